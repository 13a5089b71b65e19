use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use wolf_analysis::{extract_text, Analyzer};
use wolf_remote::{ClaimedFile, FinalizeOutcome, RemoteError, RemoteFile, RemoteFolderGateway};
use wolf_store::{
    ProcessedFileRecord, Report, ReportCompletion, ReportQuery, ReportStatus, ReportStore,
    StoreError,
};

use crate::{IngestError, PassOutcome, PassPhase, PassSummary, SchedulerStatus, INTERRUPTED_REASON};

const REPORT_STORE_NAME: &str = "reports";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionConfig {
    pub interval: Duration,
    pub remote_timeout: Duration,
    pub store_timeout: Duration,
    /// False in ephemeral mode; a disabled scheduler never touches the gateway.
    pub enabled: bool,
}

/// Counts from startup recovery of files left in the in-progress location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub resumed: usize,
    pub failed: usize,
}

enum FileOutcome {
    Processed,
    Failed,
    AlreadyClaimed,
}

/// Ingestion pass runner shared between the recurring loop and manual triggers.
pub struct IngestionScheduler {
    gateway: Arc<dyn RemoteFolderGateway>,
    reports: Arc<dyn ReportStore>,
    analyzer: Arc<dyn Analyzer>,
    config: IngestionConfig,
    pass_guard: tokio::sync::Mutex<()>,
    status: RwLock<SchedulerStatus>,
    /// Files this process claimed and has not yet relocated.
    local_claims: Mutex<HashSet<String>>,
}

impl IngestionScheduler {
    pub fn new(
        gateway: Arc<dyn RemoteFolderGateway>,
        reports: Arc<dyn ReportStore>,
        analyzer: Arc<dyn Analyzer>,
        config: IngestionConfig,
    ) -> Self {
        let status = SchedulerStatus {
            enabled: config.enabled,
            ..SchedulerStatus::default()
        };
        Self {
            gateway,
            reports,
            analyzer,
            config,
            pass_guard: tokio::sync::Mutex::new(()),
            status: RwLock::new(status),
            local_claims: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Snapshot of the observable state. Never waits on a running pass.
    pub fn status(&self) -> SchedulerStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn update_status(&self, update: impl FnOnce(&mut SchedulerStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut status);
    }

    fn set_phase(&self, phase: PassPhase) {
        self.update_status(|status| status.phase = phase);
    }

    /// Runs a pass outside the recurring schedule.
    pub async fn trigger_pass(&self) -> PassSummary {
        tracing::info!("manual ingestion pass requested");
        self.run_pass().await
    }

    /// Runs one pass, or returns `Skipped` at once if a pass is already running.
    pub async fn run_pass(&self) -> PassSummary {
        if !self.config.enabled {
            return PassSummary::immediate(PassOutcome::Disabled);
        }
        let Ok(_guard) = self.pass_guard.try_lock() else {
            tracing::debug!("ingestion pass already running; skipping");
            return PassSummary::immediate(PassOutcome::Skipped);
        };

        self.update_status(|status| {
            status.pass_in_progress = true;
            status.phase = PassPhase::Recovering;
        });
        let _marker = PassInProgress(self);
        let mut summary = PassSummary::started(Utc::now());
        if let Err(error) = self.execute_pass(&mut summary).await {
            summary.outcome = match error {
                IngestError::Remote(_) => PassOutcome::RemoteUnavailable,
                IngestError::Store(_) => PassOutcome::StoreUnavailable,
            };
            summary.error = Some(error.to_string());
        }
        summary.finished_at = Utc::now();

        match summary.outcome {
            PassOutcome::RemoteUnavailable | PassOutcome::StoreUnavailable => tracing::warn!(
                outcome = summary.outcome.as_str(),
                error = summary.error.as_deref().unwrap_or_default(),
                processed = summary.processed,
                failed = summary.failed,
                "ingestion pass stopped early; will retry next tick"
            ),
            _ => tracing::info!(
                listed = summary.listed,
                processed = summary.processed,
                failed = summary.failed,
                already_claimed = summary.already_claimed,
                resumed = summary.resumed,
                "ingestion pass completed"
            ),
        }

        let finished = summary.clone();
        self.update_status(move |status| {
            status.pass_in_progress = false;
            status.phase = PassPhase::Idle;
            status.total_passes = status.total_passes.saturating_add(1);
            if finished.outcome == PassOutcome::RemoteUnavailable {
                status.consecutive_remote_failures =
                    status.consecutive_remote_failures.saturating_add(1);
            } else {
                status.consecutive_remote_failures = 0;
            }
            status.last_pass = Some(finished);
        });
        summary
    }

    async fn execute_pass(&self, summary: &mut PassSummary) -> Result<(), IngestError> {
        let recovered = self.resume_in_progress().await?;
        summary.resumed = recovered.resumed;
        summary.failed = recovered.failed;

        self.set_phase(PassPhase::Listing);
        let processed = self
            .store_call("processed_filenames", self.reports.processed_filenames())
            .await?;
        let files = self
            .remote_call("list_new_files", self.gateway.list_new_files(&processed))
            .await?;
        summary.listed = files.len();

        for file in files {
            match self.process_file(&file).await? {
                FileOutcome::Processed => summary.processed += 1,
                FileOutcome::Failed => summary.failed += 1,
                FileOutcome::AlreadyClaimed => summary.already_claimed += 1,
            }
        }
        Ok(())
    }

    /// Settles in-progress files before listing. Recorded files are finalized
    /// from their record; unrecorded files are failed as interrupted only if
    /// this process claimed them, since another instance may still own the rest.
    async fn resume_in_progress(&self) -> Result<RecoverySummary, IngestError> {
        let in_progress = self
            .remote_call("list_in_progress", self.gateway.list_in_progress())
            .await?;
        let mut summary = RecoverySummary::default();
        for claimed in in_progress {
            let record = self
                .store_call("processed_file", self.reports.processed_file(&claimed.file.name))
                .await?;
            if let Some(record) = record {
                self.finalize(&claimed, outcome_for_status(record.status))
                    .await?;
                summary.resumed += 1;
            } else if self.holds_claim(&claimed.file.name) {
                self.fail_interrupted(&claimed).await?;
                summary.failed += 1;
            } else {
                tracing::debug!(
                    file = %claimed.file.name,
                    "in-progress file claimed by another instance; leaving it"
                );
            }
        }
        Ok(summary)
    }

    async fn process_file(&self, file: &RemoteFile) -> Result<FileOutcome, IngestError> {
        self.set_phase(PassPhase::Claiming);
        let claimed = match self.remote_call("claim", self.gateway.claim(file)).await {
            Ok(claimed) => claimed,
            Err(RemoteError::AlreadyClaimed(_)) | Err(RemoteError::NotFound(_)) => {
                tracing::debug!(file = %file.name, "file claimed elsewhere; skipping");
                return Ok(FileOutcome::AlreadyClaimed);
            }
            Err(error) => return Err(error.into()),
        };
        self.track_claim(&claimed.file.name);

        let report = Report::pending(
            &file.name,
            file.content_reference(self.gateway.backend()),
            Utc::now(),
        );
        let report_id = report.id.clone();
        let outcome = match self.record_claimed(&claimed, report).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.abandon_claimed(&claimed, &report_id, &error).await;
                return Err(error.into());
            }
        };

        self.finalize(&claimed, outcome).await?;
        Ok(match outcome {
            FinalizeOutcome::Success => FileOutcome::Processed,
            FinalizeOutcome::Failure => FileOutcome::Failed,
        })
    }

    /// Stores the pending report, analyzes the file, and persists the outcome
    /// together with the filename guard.
    async fn record_claimed(
        &self,
        claimed: &ClaimedFile,
        report: Report,
    ) -> Result<FinalizeOutcome, StoreError> {
        let report_id = report.id.clone();
        self.store_call("put_report", self.reports.put_report(report))
            .await?;

        self.set_phase(PassPhase::Processing);
        let completion = match self.analyze_claimed(claimed).await {
            Ok(analysis_result) => ReportCompletion::Processed { analysis_result },
            Err(reason) => {
                tracing::warn!(file = %claimed.file.name, reason = %reason, "report processing failed");
                ReportCompletion::Failed { reason }
            }
        };
        let status = completion.status();
        let outcome = outcome_for_status(status);
        self.store_call(
            "complete_report",
            self.reports.complete_report(&report_id, completion),
        )
        .await?;
        self.store_call(
            "record_processed_file",
            self.reports.record_processed_file(ProcessedFileRecord {
                source_filename: claimed.file.name.clone(),
                status,
                location: self.gateway.destination(outcome),
                report_id: Some(report_id),
                recorded_at: Utc::now(),
            }),
        )
        .await?;
        Ok(outcome)
    }

    /// Moves a claimed file to the error location after the store failed
    /// before its outcome was recorded. If the move fails as well, the claim
    /// stays tracked and the next pass fails the file as interrupted.
    async fn abandon_claimed(&self, claimed: &ClaimedFile, report_id: &str, error: &StoreError) {
        let reason = format!("report store failed during ingestion: {error}");
        if let Err(complete_error) = self
            .store_call(
                "complete_report",
                self.reports
                    .complete_report(report_id, ReportCompletion::Failed { reason }),
            )
            .await
        {
            tracing::debug!(
                file = %claimed.file.name,
                error = %complete_error,
                "could not mark abandoned report failed"
            );
        }
        match self.finalize(claimed, FinalizeOutcome::Failure).await {
            Ok(()) => tracing::warn!(
                file = %claimed.file.name,
                error = %error,
                "moved claimed file to error location after store failure"
            ),
            Err(finalize_error) => tracing::warn!(
                file = %claimed.file.name,
                error = %finalize_error,
                "claimed file left in progress; next pass will fail it"
            ),
        }
    }

    /// Read, extract, and analyze. Every failure becomes the report's reason.
    async fn analyze_claimed(&self, claimed: &ClaimedFile) -> Result<Value, String> {
        let bytes = self
            .remote_call("read", self.gateway.read(claimed))
            .await
            .map_err(|error| error.to_string())?;
        let content =
            extract_text(&claimed.file.name, &bytes).map_err(|error| error.to_string())?;
        let result = self
            .analyzer
            .analyze(&content)
            .await
            .map_err(|error| error.to_string())?;
        Ok(result.into_record())
    }

    async fn finalize(
        &self,
        claimed: &ClaimedFile,
        outcome: FinalizeOutcome,
    ) -> Result<(), IngestError> {
        self.set_phase(PassPhase::Finalizing);
        match self
            .remote_call("finalize", self.gateway.finalize(claimed, outcome))
            .await
        {
            Ok(finalized) => {
                self.release_claim(&claimed.file.name);
                tracing::info!(
                    file = %finalized.name,
                    location = %finalized.location,
                    "relocated report file"
                );
                Ok(())
            }
            Err(RemoteError::NotFound(name)) => {
                self.release_claim(&claimed.file.name);
                tracing::warn!(file = %name, "claimed file vanished before relocation");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Fails the pending report of an in-progress file with no record, writes
    /// its guard, and moves it to the error location.
    async fn fail_interrupted(&self, claimed: &ClaimedFile) -> Result<(), IngestError> {
        let name = claimed.file.name.clone();
        let pending = self
            .store_call(
                "list_by_status",
                self.reports.list_by_status(ReportQuery {
                    statuses: Some(vec![ReportStatus::Pending]),
                    source_filename: Some(name.clone()),
                    limit: None,
                }),
            )
            .await?;
        let mut report_id = None;
        for report in pending {
            self.store_call(
                "complete_report",
                self.reports.complete_report(
                    &report.id,
                    ReportCompletion::Failed {
                        reason: INTERRUPTED_REASON.to_string(),
                    },
                ),
            )
            .await?;
            report_id = Some(report.id);
        }
        self.store_call(
            "record_processed_file",
            self.reports.record_processed_file(ProcessedFileRecord {
                source_filename: name.clone(),
                status: ReportStatus::Failed,
                location: self.gateway.destination(FinalizeOutcome::Failure),
                report_id,
                recorded_at: Utc::now(),
            }),
        )
        .await?;
        self.finalize(claimed, FinalizeOutcome::Failure).await?;
        tracing::warn!(file = %name, "moved interrupted file to error location");
        Ok(())
    }

    /// Startup recovery for files left in the in-progress location by a
    /// previous process.
    pub async fn recover_stranded(&self) -> Result<RecoverySummary, IngestError> {
        let mut summary = RecoverySummary::default();
        if !self.config.enabled {
            return Ok(summary);
        }
        let _guard = self.pass_guard.lock().await;
        self.set_phase(PassPhase::Recovering);
        let result = self.recover_stranded_locked(&mut summary).await;
        self.set_phase(PassPhase::Idle);
        result?;
        if summary.resumed + summary.failed > 0 {
            tracing::info!(
                resumed = summary.resumed,
                failed = summary.failed,
                "recovered stranded in-progress files"
            );
        }
        Ok(summary)
    }

    async fn recover_stranded_locked(
        &self,
        summary: &mut RecoverySummary,
    ) -> Result<(), IngestError> {
        let in_progress = self
            .remote_call("list_in_progress", self.gateway.list_in_progress())
            .await?;
        for claimed in in_progress {
            let record = self
                .store_call("processed_file", self.reports.processed_file(&claimed.file.name))
                .await?;
            if let Some(record) = record {
                self.finalize(&claimed, outcome_for_status(record.status))
                    .await?;
                summary.resumed += 1;
            } else {
                self.fail_interrupted(&claimed).await?;
                summary.failed += 1;
            }
        }
        Ok(())
    }

    fn track_claim(&self, name: &str) {
        self.local_claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    fn release_claim(&self, name: &str) {
        self.local_claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    fn holds_claim(&self, name: &str) -> bool {
        self.local_claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    async fn remote_call<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        match tokio::time::timeout(self.config.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::unavailable(
                operation,
                format!("timed out after {:?}", self.config.remote_timeout),
            )),
        }
    }

    async fn store_call<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable {
                store: REPORT_STORE_NAME,
                reason: format!(
                    "{operation} timed out after {:?}",
                    self.config.store_timeout
                ),
            }),
        }
    }
}

/// Clears the in-progress flag if a pass future is dropped before it finishes.
struct PassInProgress<'a>(&'a IngestionScheduler);

impl Drop for PassInProgress<'_> {
    fn drop(&mut self) {
        self.0.update_status(|status| {
            status.pass_in_progress = false;
            status.phase = PassPhase::Idle;
        });
    }
}

fn outcome_for_status(status: ReportStatus) -> FinalizeOutcome {
    match status {
        ReportStatus::Processed => FinalizeOutcome::Success,
        ReportStatus::Pending | ReportStatus::Failed => FinalizeOutcome::Failure,
    }
}
