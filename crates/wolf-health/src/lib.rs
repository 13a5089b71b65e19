//! Read-only health aggregation across stores, remote storage, the
//! ingestion scheduler, configuration, analysis, and keys.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use wolf_analysis::Analyzer;
use wolf_config::{render_config_status, ConfigIssue, ConfigIssueSeverity, OperationMode};
use wolf_ingest::{IngestionScheduler, PassSummary};
use wolf_keys::{KeyName, KeyRegistry};
use wolf_remote::{RemoteError, RemoteFolderGateway};
use wolf_store::{PromptStore, ReportStore, StoreError};

pub const OVERALL_LABEL_OK: &str = "全部正常";
pub const OVERALL_LABEL_DEGRADED: &str = "部分異常";
pub const OVERALL_LABEL_CRITICAL: &str = "嚴重故障";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Ok,
    Degraded,
    Unreachable,
    Disabled,
}

impl ComponentState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::Unreachable => "unreachable",
            Self::Disabled => "disabled",
        }
    }

    fn severity(self) -> u8 {
        match self {
            Self::Ok | Self::Disabled => 0,
            Self::Degraded => 1,
            Self::Unreachable => 2,
        }
    }

    /// Worst of the given states; `Disabled` ranks with `Ok`.
    pub fn worst(states: impl IntoIterator<Item = ComponentState>) -> ComponentState {
        states
            .into_iter()
            .map(|state| match state {
                Self::Disabled => Self::Ok,
                other => other,
            })
            .max_by_key(|state| state.severity())
            .unwrap_or(Self::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub details: Option<String>,
}

impl ComponentHealth {
    fn new(status: ComponentState, details: impl Into<String>) -> Self {
        Self {
            status,
            details: Some(details.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerHealth {
    pub status: ComponentState,
    /// `idle`, `idle, will retry`, `pass in progress`, or `disabled`.
    pub state: String,
    pub details: Option<String>,
    pub next_run_time: Option<DateTime<Utc>>,
    pub pass_in_progress: bool,
    pub last_pass: Option<PassSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeysHealth {
    pub status: ComponentState,
    pub configured: usize,
    pub total: usize,
    pub keys: Option<BTreeMap<&'static str, &'static str>>,
}

/// Point-in-time view of every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub generated_at: DateTime<Utc>,
    pub mode: OperationMode,
    pub overall: ComponentState,
    pub overall_label: &'static str,
    pub report_store: ComponentHealth,
    pub prompt_store: ComponentHealth,
    /// Present only in durable mode.
    pub remote_storage: Option<ComponentHealth>,
    pub scheduler: SchedulerHealth,
    pub configuration: ComponentHealth,
    pub analysis_service: ComponentHealth,
    pub keys: KeysHealth,
}

/// Flat projection served by `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactHealth {
    pub status: String,
    pub message: String,
    pub scheduler_status: String,
    pub remote_storage_status: String,
    pub config_status: String,
    pub mode: String,
    pub analysis_service_status: String,
}

impl HealthSnapshot {
    pub fn compact(&self) -> CompactHealth {
        let degraded = self
            .component_states()
            .into_iter()
            .filter(|(_, state)| state.severity() > 0)
            .map(|(name, state)| format!("{name} {}", state.as_str()))
            .collect::<Vec<_>>();
        let message = if degraded.is_empty() {
            "service operating normally".to_string()
        } else {
            format!("service running with issues: {}", degraded.join(", "))
        };
        CompactHealth {
            status: self.overall.as_str().to_string(),
            message,
            scheduler_status: self.scheduler.state.clone(),
            remote_storage_status: self
                .remote_storage
                .as_ref()
                .map(|remote| remote.status.as_str())
                .unwrap_or(ComponentState::Disabled.as_str())
                .to_string(),
            config_status: self.configuration.details.clone().unwrap_or_default(),
            mode: self.mode.as_str().to_string(),
            analysis_service_status: self
                .analysis_service
                .details
                .clone()
                .unwrap_or_else(|| self.analysis_service.status.as_str().to_string()),
        }
    }

    fn component_states(&self) -> Vec<(&'static str, ComponentState)> {
        let mut states = vec![
            ("report_store", self.report_store.status),
            ("prompt_store", self.prompt_store.status),
        ];
        if let Some(remote) = self.remote_storage.as_ref() {
            states.push(("remote_storage", remote.status));
        }
        states.extend([
            ("scheduler", self.scheduler.status),
            ("configuration", self.configuration.status),
            ("analysis_service", self.analysis_service.status),
            ("keys", self.keys.status),
        ]);
        states
    }

    fn all_dependencies_unreachable(&self) -> bool {
        let stores_down = self.report_store.status == ComponentState::Unreachable
            && self.prompt_store.status == ComponentState::Unreachable;
        let remote_down = self
            .remote_storage
            .as_ref()
            .map_or(true, |remote| remote.status == ComponentState::Unreachable);
        stores_down && remote_down
    }
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("every dependency is unavailable")]
    AllDependenciesUnavailable(Box<HealthSnapshot>),
}

impl HealthError {
    pub fn snapshot(&self) -> &HealthSnapshot {
        match self {
            Self::AllDependenciesUnavailable(snapshot) => snapshot,
        }
    }
}

/// Components the aggregator reads from.
pub struct HealthSources {
    pub mode: OperationMode,
    pub reports: Arc<dyn ReportStore>,
    pub prompts: Arc<dyn PromptStore>,
    pub gateway: Arc<dyn RemoteFolderGateway>,
    pub scheduler: Arc<IngestionScheduler>,
    pub analyzer: Arc<dyn Analyzer>,
    pub keys: Arc<KeyRegistry>,
    pub config_issues: Vec<ConfigIssue>,
    pub probe_timeout: Duration,
}

pub struct HealthAggregator {
    sources: HealthSources,
}

impl HealthAggregator {
    pub fn new(sources: HealthSources) -> Self {
        Self { sources }
    }

    /// Builds a snapshot without mutating any component.
    pub async fn snapshot(&self, verbose: bool) -> Result<HealthSnapshot, HealthError> {
        let sources = &self.sources;
        let report_store = store_health(
            "report store",
            self.bounded(sources.reports.ping()).await,
            sources.reports.location(),
        );
        let prompt_store = store_health(
            "prompt store",
            self.bounded(sources.prompts.ping()).await,
            sources.prompts.location(),
        );

        let scheduler_status = sources.scheduler.status();
        let remote_storage = if sources.mode.is_durable() {
            Some(self.remote_health(scheduler_status.last_pass_remote_unavailable()).await)
        } else {
            None
        };

        let scheduler_state = scheduler_status.status_text();
        let scheduler = SchedulerHealth {
            status: if !scheduler_status.enabled {
                ComponentState::Disabled
            } else if scheduler_state == "idle, will retry" {
                ComponentState::Degraded
            } else {
                ComponentState::Ok
            },
            state: scheduler_state.to_string(),
            details: scheduler_details(&scheduler_status),
            next_run_time: scheduler_status.next_run_at,
            pass_in_progress: scheduler_status.pass_in_progress,
            last_pass: if verbose {
                scheduler_status.last_pass.clone()
            } else {
                None
            },
        };

        let blocking = sources
            .config_issues
            .iter()
            .any(|issue| issue.severity != ConfigIssueSeverity::Info);
        let configuration = ComponentHealth::new(
            if blocking {
                ComponentState::Degraded
            } else {
                ComponentState::Ok
            },
            render_config_status(sources.mode, &sources.config_issues),
        );

        let analyzer_status = sources.analyzer.status();
        let analysis_service = ComponentHealth::new(
            if analyzer_status.is_configured() {
                ComponentState::Ok
            } else {
                ComponentState::Degraded
            },
            analyzer_status.detail,
        );

        let keys = KeysHealth {
            status: ComponentState::Ok,
            configured: sources.keys.configured_count(),
            total: KeyName::ALL.len(),
            keys: verbose.then(|| sources.keys.status_labels()),
        };

        let mut snapshot = HealthSnapshot {
            generated_at: Utc::now(),
            mode: sources.mode,
            overall: ComponentState::Ok,
            overall_label: OVERALL_LABEL_OK,
            report_store,
            prompt_store,
            remote_storage,
            scheduler,
            configuration,
            analysis_service,
            keys,
        };
        snapshot.overall = ComponentState::worst(
            snapshot
                .component_states()
                .into_iter()
                .map(|(_, state)| state),
        );
        snapshot.overall_label = match snapshot.overall {
            ComponentState::Ok | ComponentState::Disabled => OVERALL_LABEL_OK,
            ComponentState::Degraded => OVERALL_LABEL_DEGRADED,
            ComponentState::Unreachable => OVERALL_LABEL_CRITICAL,
        };

        if snapshot.all_dependencies_unreachable() {
            tracing::error!("health snapshot: every dependency is unavailable");
            return Err(HealthError::AllDependenciesUnavailable(Box::new(snapshot)));
        }
        Ok(snapshot)
    }

    async fn remote_health(&self, last_pass_remote_unavailable: bool) -> ComponentHealth {
        let probe = tokio::time::timeout(
            self.sources.probe_timeout,
            self.sources.gateway.probe(),
        )
        .await;
        let backend = self.sources.gateway.backend();
        match probe {
            Ok(Ok(())) if last_pass_remote_unavailable => ComponentHealth::new(
                ComponentState::Unreachable,
                format!("{backend} reachable now, but the last ingestion pass could not reach it"),
            ),
            Ok(Ok(())) => ComponentHealth::new(ComponentState::Ok, format!("{backend} reachable")),
            Ok(Err(RemoteError::Disabled)) => {
                ComponentHealth::new(ComponentState::Disabled, "remote storage disabled")
            }
            Ok(Err(error)) => ComponentHealth::new(ComponentState::Unreachable, error.to_string()),
            Err(_) => ComponentHealth::new(
                ComponentState::Unreachable,
                format!(
                    "{backend} probe timed out after {:?}",
                    self.sources.probe_timeout
                ),
            ),
        }
    }

    async fn bounded(&self, ping: impl Future<Output = Result<(), StoreError>>) -> Result<(), String> {
        match tokio::time::timeout(self.sources.probe_timeout, ping).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(error.to_string()),
            Err(_) => Err(format!(
                "ping timed out after {:?}",
                self.sources.probe_timeout
            )),
        }
    }
}

fn store_health(
    label: &str,
    ping: Result<(), String>,
    location: Option<std::path::PathBuf>,
) -> ComponentHealth {
    match ping {
        Ok(()) => ComponentHealth::new(
            ComponentState::Ok,
            match location {
                Some(path) => format!("{label} reachable at {}", path.display()),
                None => format!("{label} reachable"),
            },
        ),
        Err(reason) => ComponentHealth::new(ComponentState::Unreachable, reason),
    }
}

fn scheduler_details(status: &wolf_ingest::SchedulerStatus) -> Option<String> {
    if !status.enabled {
        return Some("ingestion disabled in ephemeral mode".to_string());
    }
    let pass = status.last_pass.as_ref()?;
    let mut details = format!(
        "last pass {}: processed {}, failed {}",
        pass.outcome.as_str(),
        pass.processed,
        pass.failed
    );
    if let Some(next) = status.next_run_at {
        details.push_str(&format!("; next run {}", next.to_rfc3339()));
    }
    Some(details)
}
