use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::{
    ProcessedFileRecord, PromptRecord, PromptStore, Report, ReportCompletion, ReportQuery,
    ReportStore, StoreError, StoreResult,
};

/// Stand-in for a store that failed to open at startup.
///
/// Every operation returns `StoreError::Unavailable`, which keeps the failure
/// isolated to callers of this store while the rest of the process serves.
#[derive(Debug, Clone)]
pub struct UnavailableStore {
    store: &'static str,
    reason: String,
    location: Option<PathBuf>,
}

impl UnavailableStore {
    pub fn new(store: &'static str, reason: impl Into<String>, location: Option<PathBuf>) -> Self {
        Self {
            store,
            reason: reason.into(),
            location,
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn error(&self) -> StoreError {
        StoreError::Unavailable {
            store: self.store,
            reason: self.reason.clone(),
        }
    }
}

#[async_trait]
impl ReportStore for UnavailableStore {
    async fn put_report(&self, _report: Report) -> StoreResult<()> {
        Err(self.error())
    }

    async fn get_report(&self, _report_id: &str) -> StoreResult<Report> {
        Err(self.error())
    }

    async fn list_by_status(&self, _query: ReportQuery) -> StoreResult<Vec<Report>> {
        Err(self.error())
    }

    async fn complete_report(
        &self,
        _report_id: &str,
        _completion: ReportCompletion,
    ) -> StoreResult<Report> {
        Err(self.error())
    }

    async fn record_processed_file(&self, _record: ProcessedFileRecord) -> StoreResult<()> {
        Err(self.error())
    }

    async fn processed_file(
        &self,
        _source_filename: &str,
    ) -> StoreResult<Option<ProcessedFileRecord>> {
        Err(self.error())
    }

    async fn processed_filenames(&self) -> StoreResult<HashSet<String>> {
        Err(self.error())
    }

    async fn requeue_report(&self, _report_id: &str) -> StoreResult<Report> {
        Err(self.error())
    }

    async fn ping(&self) -> StoreResult<()> {
        Err(self.error())
    }

    fn location(&self) -> Option<PathBuf> {
        self.location.clone()
    }
}

#[async_trait]
impl PromptStore for UnavailableStore {
    async fn put_prompt(&self, _record: PromptRecord) -> StoreResult<PromptRecord> {
        Err(self.error())
    }

    async fn get_prompt(&self, _prompt_id: &str) -> StoreResult<PromptRecord> {
        Err(self.error())
    }

    async fn get_template(&self, _name: &str) -> StoreResult<PromptRecord> {
        Err(self.error())
    }

    async fn list_templates(&self, _limit: usize, _offset: usize) -> StoreResult<Vec<PromptRecord>> {
        Err(self.error())
    }

    async fn list_conversation(&self, _session_id: &str) -> StoreResult<Vec<PromptRecord>> {
        Err(self.error())
    }

    async fn ping(&self) -> StoreResult<()> {
        Err(self.error())
    }

    fn location(&self) -> Option<PathBuf> {
        self.location.clone()
    }
}
