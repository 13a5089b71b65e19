//! Record stores for ingested reports and prompt state.
//!
//! Two independently owned SQLite files back the stores: one for `Report`
//! rows and their `ProcessedFileRecord` guards, one for `PromptRecord` rows.
//! The stores share no connection, lock, or transaction.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use wolf_core::{derive_report_id, short_digest};

mod prompts;
mod reports;
mod sqlite_support;
mod unavailable;

pub use prompts::SqlitePromptStore;
pub use reports::SqliteReportStore;
pub use unavailable::UnavailableStore;

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store '{store}' is unavailable: {reason}")]
    Unavailable { store: &'static str, reason: String },
    #[error("record '{0}' not found")]
    NotFound(String),
    #[error("record '{0}' already exists")]
    AlreadyExists(String),
    #[error("invalid report status transition: {from} -> {to}")]
    InvalidTransition {
        from: ReportStatus,
        to: ReportStatus,
    },
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True when the store itself cannot serve requests, as opposed to a
    /// rejected operation.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Sqlite(_) | Self::Io(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Processed,
    Failed,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            _ => Err(StoreError::InvalidPersistedValue {
                field: "processing_status",
                value: value.to_string(),
            }),
        }
    }
}

/// One ingested report file and its processing outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub source_filename: String,
    pub ingestion_timestamp: DateTime<Utc>,
    pub processing_status: ReportStatus,
    pub raw_content_reference: String,
    pub analysis_result: Option<Value>,
    pub failure_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Report {
    /// Builds a pending report with an id derived from filename and ingestion time.
    pub fn pending(
        source_filename: impl Into<String>,
        raw_content_reference: impl Into<String>,
        ingestion_timestamp: DateTime<Utc>,
    ) -> Self {
        let source_filename = source_filename.into();
        Self {
            id: derive_report_id(&source_filename, ingestion_timestamp),
            source_filename,
            ingestion_timestamp,
            processing_status: ReportStatus::Pending,
            raw_content_reference: raw_content_reference.into(),
            analysis_result: None,
            failure_reason: None,
            completed_at: None,
        }
    }
}

/// Terminal outcome applied to a pending report.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportCompletion {
    Processed { analysis_result: Value },
    Failed { reason: String },
}

impl ReportCompletion {
    pub fn status(&self) -> ReportStatus {
        match self {
            Self::Processed { .. } => ReportStatus::Processed,
            Self::Failed { .. } => ReportStatus::Failed,
        }
    }
}

/// Filter for `ReportStore::list_by_status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportQuery {
    pub statuses: Option<Vec<ReportStatus>>,
    pub source_filename: Option<String>,
    pub limit: Option<usize>,
}

impl ReportQuery {
    pub fn with_status(status: ReportStatus) -> Self {
        Self {
            statuses: Some(vec![status]),
            ..Self::default()
        }
    }
}

/// Store-backed guard recording that a filename reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedFileRecord {
    pub source_filename: String,
    pub status: ReportStatus,
    pub location: String,
    pub report_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Template,
    ConversationTurn,
}

impl PromptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::ConversationTurn => "conversation_turn",
        }
    }
}

impl FromStr for PromptKind {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "template" => Ok(Self::Template),
            "conversation_turn" => Ok(Self::ConversationTurn),
            _ => Err(StoreError::InvalidPersistedValue {
                field: "prompt_kind",
                value: value.to_string(),
            }),
        }
    }
}

/// A prompt template or a single conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub id: String,
    pub kind: PromptKind,
    pub name: Option<String>,
    pub session_id: Option<String>,
    pub role: Option<String>,
    pub category: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PromptRecord {
    /// Template keyed by `name`; writing the same name again replaces its content.
    pub fn template(
        name: impl Into<String>,
        content: impl Into<String>,
        category: Option<String>,
    ) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: format!("tpl-{}", short_digest(name.as_bytes(), 16)),
            kind: PromptKind::Template,
            name: Some(name),
            session_id: None,
            role: None,
            category,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A conversational turn appended to `session_id`.
    pub fn conversation_turn(
        session_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let session_id = session_id.into();
        let role = role.into();
        let content = content.into();
        let now = Utc::now();
        let material = format!(
            "{session_id}\u{1f}{role}\u{1f}{}\u{1f}{content}",
            now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros())
        );
        Self {
            id: format!("turn-{}", short_digest(material.as_bytes(), 24)),
            kind: PromptKind::ConversationTurn,
            name: None,
            session_id: Some(session_id),
            role: Some(role),
            category: None,
            content,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Async contract for the report store.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Inserts a new report. Fails with `AlreadyExists` if the id is taken.
    async fn put_report(&self, report: Report) -> StoreResult<()>;
    async fn get_report(&self, report_id: &str) -> StoreResult<Report>;
    async fn list_by_status(&self, query: ReportQuery) -> StoreResult<Vec<Report>>;
    /// Moves a pending report to a terminal status.
    async fn complete_report(
        &self,
        report_id: &str,
        completion: ReportCompletion,
    ) -> StoreResult<Report>;
    async fn record_processed_file(&self, record: ProcessedFileRecord) -> StoreResult<()>;
    async fn processed_file(&self, source_filename: &str)
        -> StoreResult<Option<ProcessedFileRecord>>;
    async fn processed_filenames(&self) -> StoreResult<HashSet<String>>;
    /// Returns a terminal report to pending and drops its filename guard.
    async fn requeue_report(&self, report_id: &str) -> StoreResult<Report>;
    /// Trivial read proving the store can serve requests.
    async fn ping(&self) -> StoreResult<()>;
    fn location(&self) -> Option<PathBuf>;
}

/// Async contract for the prompt store.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Inserts or replaces a record by id.
    async fn put_prompt(&self, record: PromptRecord) -> StoreResult<PromptRecord>;
    async fn get_prompt(&self, prompt_id: &str) -> StoreResult<PromptRecord>;
    async fn get_template(&self, name: &str) -> StoreResult<PromptRecord>;
    async fn list_templates(&self, limit: usize, offset: usize) -> StoreResult<Vec<PromptRecord>>;
    async fn list_conversation(&self, session_id: &str) -> StoreResult<Vec<PromptRecord>>;
    async fn ping(&self) -> StoreResult<()>;
    fn location(&self) -> Option<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::{PromptKind, PromptRecord, Report, ReportCompletion, ReportStatus};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn unit_report_pending_derives_stable_id() {
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).single().expect("timestamp");
        let first = Report::pending("report_2024W10.txt", "filesystem://report_2024W10.txt", at);
        let second = Report::pending("report_2024W10.txt", "other", at);
        assert_eq!(first.id, second.id);
        assert_eq!(first.processing_status, ReportStatus::Pending);
        assert!(first.analysis_result.is_none());
    }

    #[test]
    fn unit_report_status_round_trips_through_text() {
        for status in [
            ReportStatus::Pending,
            ReportStatus::Processed,
            ReportStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ReportStatus>().expect("parse"), status);
        }
        assert!("archived".parse::<ReportStatus>().is_err());
        assert!(!ReportStatus::Pending.is_terminal());
        assert!(ReportStatus::Failed.is_terminal());
    }

    #[test]
    fn unit_report_completion_maps_to_terminal_status() {
        let processed = ReportCompletion::Processed {
            analysis_result: json!({"summary": "ok"}),
        };
        let failed = ReportCompletion::Failed {
            reason: "boom".to_string(),
        };
        assert_eq!(processed.status(), ReportStatus::Processed);
        assert_eq!(failed.status(), ReportStatus::Failed);
    }

    #[test]
    fn unit_prompt_template_id_is_keyed_by_name() {
        let first = PromptRecord::template("weekly_summary", "v1", None);
        let second = PromptRecord::template("weekly_summary", "v2", Some("reports".to_string()));
        assert_eq!(first.id, second.id);
        assert_eq!(first.kind, PromptKind::Template);
        let turn = PromptRecord::conversation_turn("session-1", "user", "hello");
        assert_eq!(turn.kind, PromptKind::ConversationTurn);
        assert!(turn.id.starts_with("turn-"));
    }
}
