use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use wolf_analysis::{
    AnalysisError, AnalysisResult, Analyzer, AnalyzerState, AnalyzerStatus, ReportContent,
};
use wolf_remote::{
    ClaimedFile, FinalizeOutcome, FinalizedFile, RemoteError, RemoteFile, RemoteFolderGateway,
    RemoteResult,
};
use wolf_store::{
    ProcessedFileRecord, Report, ReportCompletion, ReportQuery, ReportStore, SqliteReportStore,
    StoreError, StoreResult,
};

#[derive(Default)]
struct Folders {
    inbox: BTreeMap<String, Vec<u8>>,
    in_progress: BTreeMap<String, Vec<u8>>,
    archive: BTreeMap<String, Vec<u8>>,
    error: BTreeMap<String, Vec<u8>>,
}

/// In-memory gateway with switchable outages.
#[derive(Default)]
pub(crate) struct MemoryGateway {
    folders: Mutex<Folders>,
    unavailable: AtomicBool,
    fail_next_finalize: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryGateway {
    pub(crate) fn add_inbox_file(&self, name: &str, content: &str) {
        self.lock()
            .inbox
            .insert(name.to_string(), content.as_bytes().to_vec());
    }

    pub(crate) fn add_in_progress_file(&self, name: &str, content: &str) {
        self.lock()
            .in_progress
            .insert(name.to_string(), content.as_bytes().to_vec());
    }

    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_finalize(&self) {
        self.fail_next_finalize.store(true, Ordering::SeqCst);
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn inbox_names(&self) -> Vec<String> {
        self.lock().inbox.keys().cloned().collect()
    }

    pub(crate) fn in_progress_names(&self) -> Vec<String> {
        self.lock().in_progress.keys().cloned().collect()
    }

    pub(crate) fn archive_names(&self) -> Vec<String> {
        self.lock().archive.keys().cloned().collect()
    }

    pub(crate) fn error_names(&self) -> Vec<String> {
        self.lock().error.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Folders> {
        self.folders
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn enter(&self, operation: &'static str) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RemoteError::unavailable(operation, "simulated outage"));
        }
        Ok(())
    }

    fn file(name: &str, content: &[u8]) -> RemoteFile {
        RemoteFile {
            id: name.to_string(),
            name: name.to_string(),
            size_bytes: Some(content.len() as u64),
            created_at: None,
        }
    }
}

#[async_trait]
impl RemoteFolderGateway for MemoryGateway {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn destination(&self, outcome: FinalizeOutcome) -> String {
        match outcome {
            FinalizeOutcome::Success => "archive".to_string(),
            FinalizeOutcome::Failure => "error".to_string(),
        }
    }

    async fn list_new_files(&self, processed: &HashSet<String>) -> RemoteResult<Vec<RemoteFile>> {
        self.enter("list_new_files")?;
        Ok(self
            .lock()
            .inbox
            .iter()
            .filter(|(name, _)| !processed.contains(*name))
            .map(|(name, content)| Self::file(name, content))
            .collect())
    }

    async fn claim(&self, file: &RemoteFile) -> RemoteResult<ClaimedFile> {
        self.enter("claim")?;
        let mut folders = self.lock();
        let content = folders
            .inbox
            .remove(&file.name)
            .ok_or_else(|| RemoteError::AlreadyClaimed(file.name.clone()))?;
        folders.in_progress.insert(file.name.clone(), content);
        Ok(ClaimedFile {
            file: file.clone(),
            in_progress_ref: "in_progress".to_string(),
        })
    }

    async fn read(&self, claimed: &ClaimedFile) -> RemoteResult<Vec<u8>> {
        self.enter("read")?;
        self.lock()
            .in_progress
            .get(&claimed.file.name)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(claimed.file.name.clone()))
    }

    async fn finalize(
        &self,
        claimed: &ClaimedFile,
        outcome: FinalizeOutcome,
    ) -> RemoteResult<FinalizedFile> {
        self.enter("finalize")?;
        if self.fail_next_finalize.swap(false, Ordering::SeqCst) {
            return Err(RemoteError::unavailable("finalize", "simulated move failure"));
        }
        let mut folders = self.lock();
        let content = folders
            .in_progress
            .remove(&claimed.file.name)
            .ok_or_else(|| RemoteError::NotFound(claimed.file.name.clone()))?;
        match outcome {
            FinalizeOutcome::Success => folders.archive.insert(claimed.file.name.clone(), content),
            FinalizeOutcome::Failure => folders.error.insert(claimed.file.name.clone(), content),
        };
        Ok(FinalizedFile {
            name: claimed.file.name.clone(),
            location: self.destination(outcome),
        })
    }

    async fn list_in_progress(&self) -> RemoteResult<Vec<ClaimedFile>> {
        self.enter("list_in_progress")?;
        Ok(self
            .lock()
            .in_progress
            .iter()
            .map(|(name, content)| ClaimedFile {
                file: Self::file(name, content),
                in_progress_ref: "in_progress".to_string(),
            })
            .collect())
    }

    async fn probe(&self) -> RemoteResult<()> {
        self.enter("probe")
    }
}

/// Analyzer returning a fixed summary, failing for one chosen filename.
#[derive(Default)]
pub(crate) struct ScriptedAnalyzer {
    fail_on: Option<String>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedAnalyzer {
    pub(crate) fn failing_on(name: &str) -> Self {
        Self {
            fail_on: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(&self, content: &ReportContent) -> Result<AnalysisResult, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on.as_deref() == Some(content.source_filename.as_str()) {
            return Err(AnalysisError::InvalidResponse("scripted failure".to_string()));
        }
        Ok(AnalysisResult {
            payload: json!({ "summary": format!("summary of {}", content.source_filename) }),
            model: "scripted".to_string(),
        })
    }

    fn status(&self) -> AnalyzerStatus {
        AnalyzerStatus {
            state: AnalyzerState::Configured,
            detail: "scripted".to_string(),
        }
    }
}

/// SQLite report store whose `complete_report` can be switched to fail.
pub(crate) struct FlakyReportStore {
    inner: SqliteReportStore,
    fail_complete: AtomicBool,
}

impl FlakyReportStore {
    pub(crate) fn new(inner: SqliteReportStore) -> Self {
        Self {
            inner,
            fail_complete: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_fail_complete(&self, fail: bool) {
        self.fail_complete.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReportStore for FlakyReportStore {
    async fn put_report(&self, report: Report) -> StoreResult<()> {
        self.inner.put_report(report).await
    }

    async fn get_report(&self, report_id: &str) -> StoreResult<Report> {
        self.inner.get_report(report_id).await
    }

    async fn list_by_status(&self, query: ReportQuery) -> StoreResult<Vec<Report>> {
        self.inner.list_by_status(query).await
    }

    async fn complete_report(
        &self,
        report_id: &str,
        completion: ReportCompletion,
    ) -> StoreResult<Report> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                store: "report_store",
                reason: "simulated write failure".to_string(),
            });
        }
        self.inner.complete_report(report_id, completion).await
    }

    async fn record_processed_file(&self, record: ProcessedFileRecord) -> StoreResult<()> {
        self.inner.record_processed_file(record).await
    }

    async fn processed_file(
        &self,
        source_filename: &str,
    ) -> StoreResult<Option<ProcessedFileRecord>> {
        self.inner.processed_file(source_filename).await
    }

    async fn processed_filenames(&self) -> StoreResult<HashSet<String>> {
        self.inner.processed_filenames().await
    }

    async fn requeue_report(&self, report_id: &str) -> StoreResult<Report> {
        self.inner.requeue_report(report_id).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    fn location(&self) -> Option<PathBuf> {
        self.inner.location()
    }
}
