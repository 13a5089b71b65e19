use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassPhase {
    #[default]
    Idle,
    Recovering,
    Listing,
    Claiming,
    Processing,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    Completed,
    /// Another pass held the guard.
    Skipped,
    Disabled,
    RemoteUnavailable,
    StoreUnavailable,
}

impl PassOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Disabled => "disabled",
            Self::RemoteUnavailable => "remote_unavailable",
            Self::StoreUnavailable => "store_unavailable",
        }
    }

    pub fn will_retry(self) -> bool {
        matches!(self, Self::RemoteUnavailable | Self::StoreUnavailable)
    }
}

/// Counters and outcome for one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: PassOutcome,
    pub listed: usize,
    pub processed: usize,
    pub failed: usize,
    pub already_claimed: usize,
    /// In-progress files finalized from an existing processed-file record.
    pub resumed: usize,
    pub error: Option<String>,
}

impl PassSummary {
    pub(crate) fn started(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            outcome: PassOutcome::Completed,
            listed: 0,
            processed: 0,
            failed: 0,
            already_claimed: 0,
            resumed: 0,
            error: None,
        }
    }

    pub(crate) fn immediate(outcome: PassOutcome) -> Self {
        let mut summary = Self::started(Utc::now());
        summary.outcome = outcome;
        summary
    }
}

/// Observable scheduler state; cloned out for readers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub phase: PassPhase,
    pub pass_in_progress: bool,
    pub last_pass: Option<PassSummary>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub consecutive_remote_failures: u32,
    pub total_passes: u64,
}

impl SchedulerStatus {
    pub fn status_text(&self) -> &'static str {
        if !self.enabled {
            return "disabled";
        }
        if self.pass_in_progress {
            return "pass in progress";
        }
        match self.last_pass.as_ref() {
            Some(pass) if pass.outcome.will_retry() => "idle, will retry",
            _ => "idle",
        }
    }

    pub fn last_pass_remote_unavailable(&self) -> bool {
        self.last_pass
            .as_ref()
            .is_some_and(|pass| pass.outcome == PassOutcome::RemoteUnavailable)
    }
}
