//! SQLite-backed `ReportStore` implementation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};

use crate::sqlite_support::{
    lock_writer, open_connection, open_writer, option_timestamp_from_db, option_timestamp_to_db,
    run_blocking, timestamp_from_db, timestamp_to_db, usize_to_i64, DEFAULT_BUSY_TIMEOUT,
};
use crate::{
    ProcessedFileRecord, Report, ReportCompletion, ReportQuery, ReportStatus, ReportStore,
    StoreError, StoreResult,
};

const STORE_NAME: &str = "report_store";

const REPORT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS reports (
    id TEXT PRIMARY KEY,
    source_filename TEXT NOT NULL,
    ingestion_timestamp TEXT NOT NULL,
    processing_status TEXT NOT NULL,
    raw_content_reference TEXT NOT NULL,
    analysis_result TEXT NULL,
    failure_reason TEXT NULL,
    completed_at TEXT NULL
);

CREATE INDEX IF NOT EXISTS idx_reports_processing_status ON reports (processing_status);
CREATE INDEX IF NOT EXISTS idx_reports_source_filename ON reports (source_filename);

CREATE TABLE IF NOT EXISTS processed_files (
    source_filename TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    location TEXT NOT NULL,
    report_id TEXT NULL,
    recorded_at TEXT NOT NULL
);
"#;

const REPORT_COLUMNS: &str = "id, source_filename, ingestion_timestamp, processing_status, \
    raw_content_reference, analysis_result, failure_reason, completed_at";

/// Report store owning one SQLite file with a single writer connection.
///
/// Every operation runs on the blocking pool; clones share the connection.
#[derive(Debug, Clone)]
pub struct SqliteReportStore {
    db: Arc<ReportDb>,
}

#[derive(Debug)]
struct ReportDb {
    db_path: PathBuf,
    busy_timeout: Duration,
    writer: Mutex<Connection>,
}

impl SqliteReportStore {
    /// Opens (or creates) the store at `path`, failing with
    /// `StoreError::Unavailable` when the file cannot be used.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn with_busy_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        let writer = open_writer(STORE_NAME, &db_path, busy_timeout, REPORT_SCHEMA)?;
        Ok(Self {
            db: Arc::new(ReportDb {
                db_path,
                busy_timeout,
                writer: Mutex::new(writer),
            }),
        })
    }
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn put_report(&self, report: Report) -> StoreResult<()> {
        let db = self.db.clone();
        run_blocking(STORE_NAME, move || db.put_report(report)).await
    }

    async fn get_report(&self, report_id: &str) -> StoreResult<Report> {
        let db = self.db.clone();
        let report_id = report_id.to_string();
        run_blocking(STORE_NAME, move || db.get_report(&report_id)).await
    }

    async fn list_by_status(&self, query: ReportQuery) -> StoreResult<Vec<Report>> {
        let db = self.db.clone();
        run_blocking(STORE_NAME, move || db.list_by_status(query)).await
    }

    async fn complete_report(
        &self,
        report_id: &str,
        completion: ReportCompletion,
    ) -> StoreResult<Report> {
        let db = self.db.clone();
        let report_id = report_id.to_string();
        run_blocking(STORE_NAME, move || db.complete_report(&report_id, completion)).await
    }

    async fn record_processed_file(&self, record: ProcessedFileRecord) -> StoreResult<()> {
        let db = self.db.clone();
        run_blocking(STORE_NAME, move || db.record_processed_file(record)).await
    }

    async fn processed_file(
        &self,
        source_filename: &str,
    ) -> StoreResult<Option<ProcessedFileRecord>> {
        let db = self.db.clone();
        let source_filename = source_filename.to_string();
        run_blocking(STORE_NAME, move || db.processed_file(&source_filename)).await
    }

    async fn processed_filenames(&self) -> StoreResult<HashSet<String>> {
        let db = self.db.clone();
        run_blocking(STORE_NAME, move || db.processed_filenames()).await
    }

    async fn requeue_report(&self, report_id: &str) -> StoreResult<Report> {
        let db = self.db.clone();
        let report_id = report_id.to_string();
        run_blocking(STORE_NAME, move || db.requeue_report(&report_id)).await
    }

    async fn ping(&self) -> StoreResult<()> {
        let db = self.db.clone();
        run_blocking(STORE_NAME, move || db.ping()).await
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.db.db_path.clone())
    }
}

impl ReportDb {
    fn open_reader(&self) -> StoreResult<Connection> {
        open_connection(&self.db_path, self.busy_timeout)
    }

    fn put_report(&self, report: Report) -> StoreResult<()> {
        if report.source_filename.trim().is_empty() {
            return Err(StoreError::InvalidRecord(
                "source_filename must not be empty".to_string(),
            ));
        }
        let mut connection = lock_writer(STORE_NAME, &self.writer)?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let exists = transaction
            .query_row(
                "SELECT 1 FROM reports WHERE id = ?1",
                params![report.id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::AlreadyExists(report.id));
        }
        let analysis_result = report
            .analysis_result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        transaction.execute(
            r#"
            INSERT INTO reports (
                id, source_filename, ingestion_timestamp, processing_status,
                raw_content_reference, analysis_result, failure_reason, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                report.id,
                report.source_filename,
                timestamp_to_db(report.ingestion_timestamp),
                report.processing_status.as_str(),
                report.raw_content_reference,
                analysis_result,
                report.failure_reason,
                option_timestamp_to_db(report.completed_at),
            ],
        )?;
        transaction.commit()?;
        tracing::debug!(report_id = %report.id, file = %report.source_filename, "report stored");
        Ok(())
    }

    fn get_report(&self, report_id: &str) -> StoreResult<Report> {
        let connection = self.open_reader()?;
        load_report(&connection, report_id)?
            .ok_or_else(|| StoreError::NotFound(report_id.to_string()))
    }

    fn list_by_status(&self, query: ReportQuery) -> StoreResult<Vec<Report>> {
        let mut clauses = Vec::new();
        let mut values = Vec::<String>::new();
        if let Some(statuses) = query.statuses.as_ref() {
            if statuses.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = statuses
                .iter()
                .map(|status| {
                    values.push(status.as_str().to_string());
                    format!("?{}", values.len())
                })
                .collect::<Vec<_>>()
                .join(", ");
            clauses.push(format!("processing_status IN ({placeholders})"));
        }
        if let Some(source_filename) = query.source_filename.as_ref() {
            values.push(source_filename.clone());
            clauses.push(format!("source_filename = ?{}", values.len()));
        }

        let mut sql = format!("SELECT {REPORT_COLUMNS} FROM reports");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY ingestion_timestamp ASC, id ASC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", usize_to_i64(limit)));
        }

        let connection = self.open_reader()?;
        let mut statement = connection.prepare(&sql)?;
        let rows = statement
            .query_map(params_from_iter(values.iter()), ReportRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ReportRow::into_report).collect()
    }

    fn complete_report(
        &self,
        report_id: &str,
        completion: ReportCompletion,
    ) -> StoreResult<Report> {
        let mut connection = lock_writer(STORE_NAME, &self.writer)?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut report = load_report(&transaction, report_id)?
            .ok_or_else(|| StoreError::NotFound(report_id.to_string()))?;
        let next = completion.status();
        if report.processing_status != ReportStatus::Pending {
            return Err(StoreError::InvalidTransition {
                from: report.processing_status,
                to: next,
            });
        }

        let completed_at = Utc::now();
        match completion {
            ReportCompletion::Processed { analysis_result } => {
                report.analysis_result = Some(analysis_result);
                report.failure_reason = None;
            }
            ReportCompletion::Failed { reason } => {
                report.analysis_result = None;
                report.failure_reason = Some(reason);
            }
        }
        report.processing_status = next;
        report.completed_at = Some(completed_at);

        let analysis_result = report
            .analysis_result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        transaction.execute(
            r#"
            UPDATE reports
            SET processing_status = ?2, analysis_result = ?3, failure_reason = ?4, completed_at = ?5
            WHERE id = ?1
            "#,
            params![
                report.id,
                next.as_str(),
                analysis_result,
                report.failure_reason,
                timestamp_to_db(completed_at),
            ],
        )?;
        transaction.commit()?;
        Ok(report)
    }

    fn record_processed_file(&self, record: ProcessedFileRecord) -> StoreResult<()> {
        if !record.status.is_terminal() {
            return Err(StoreError::InvalidRecord(format!(
                "processed file record for '{}' must carry a terminal status",
                record.source_filename
            )));
        }
        let connection = lock_writer(STORE_NAME, &self.writer)?;
        connection.execute(
            r#"
            INSERT INTO processed_files (source_filename, status, location, report_id, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(source_filename) DO UPDATE SET
                status = excluded.status,
                location = excluded.location,
                report_id = excluded.report_id,
                recorded_at = excluded.recorded_at
            "#,
            params![
                record.source_filename,
                record.status.as_str(),
                record.location,
                record.report_id,
                timestamp_to_db(record.recorded_at),
            ],
        )?;
        Ok(())
    }

    fn processed_file(
        &self,
        source_filename: &str,
    ) -> StoreResult<Option<ProcessedFileRecord>> {
        let connection = self.open_reader()?;
        let row = connection
            .query_row(
                r#"
                SELECT source_filename, status, location, report_id, recorded_at
                FROM processed_files WHERE source_filename = ?1
                "#,
                params![source_filename],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        row.map(
            |(source_filename, status, location, report_id, recorded_at)| {
                Ok(ProcessedFileRecord {
                    source_filename,
                    status: status.parse()?,
                    location,
                    report_id,
                    recorded_at: timestamp_from_db(&recorded_at)?,
                })
            },
        )
        .transpose()
    }

    fn processed_filenames(&self) -> StoreResult<HashSet<String>> {
        let connection = self.open_reader()?;
        let mut statement = connection.prepare("SELECT source_filename FROM processed_files")?;
        let names = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(names)
    }

    fn requeue_report(&self, report_id: &str) -> StoreResult<Report> {
        let mut connection = lock_writer(STORE_NAME, &self.writer)?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut report = load_report(&transaction, report_id)?
            .ok_or_else(|| StoreError::NotFound(report_id.to_string()))?;
        if !report.processing_status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                from: report.processing_status,
                to: ReportStatus::Pending,
            });
        }
        transaction.execute(
            r#"
            UPDATE reports
            SET processing_status = 'pending', analysis_result = NULL,
                failure_reason = NULL, completed_at = NULL
            WHERE id = ?1
            "#,
            params![report.id],
        )?;
        transaction.execute(
            "DELETE FROM processed_files WHERE source_filename = ?1",
            params![report.source_filename],
        )?;
        transaction.commit()?;

        report.processing_status = ReportStatus::Pending;
        report.analysis_result = None;
        report.failure_reason = None;
        report.completed_at = None;
        tracing::info!(report_id = %report.id, file = %report.source_filename, "report requeued");
        Ok(report)
    }

    fn ping(&self) -> StoreResult<()> {
        let connection = self.open_reader()?;
        connection
            .query_row("SELECT 1 FROM reports LIMIT 1", [], |row| row.get::<_, i64>(0))
            .optional()?;
        Ok(())
    }
}

struct ReportRow {
    id: String,
    source_filename: String,
    ingestion_timestamp: String,
    processing_status: String,
    raw_content_reference: String,
    analysis_result: Option<String>,
    failure_reason: Option<String>,
    completed_at: Option<String>,
}

impl ReportRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_filename: row.get(1)?,
            ingestion_timestamp: row.get(2)?,
            processing_status: row.get(3)?,
            raw_content_reference: row.get(4)?,
            analysis_result: row.get(5)?,
            failure_reason: row.get(6)?,
            completed_at: row.get(7)?,
        })
    }

    fn into_report(self) -> StoreResult<Report> {
        Ok(Report {
            id: self.id,
            source_filename: self.source_filename,
            ingestion_timestamp: timestamp_from_db(&self.ingestion_timestamp)?,
            processing_status: self.processing_status.parse()?,
            raw_content_reference: self.raw_content_reference,
            analysis_result: self
                .analysis_result
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            failure_reason: self.failure_reason,
            completed_at: option_timestamp_from_db(self.completed_at)?,
        })
    }
}

fn load_report(connection: &Connection, report_id: &str) -> StoreResult<Option<Report>> {
    let row = connection
        .query_row(
            &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1"),
            params![report_id],
            ReportRow::from_row,
        )
        .optional()?;
    row.map(ReportRow::into_report).transpose()
}

#[cfg(test)]
mod tests {
    use super::SqliteReportStore;
    use crate::{
        ProcessedFileRecord, Report, ReportCompletion, ReportQuery, ReportStatus, ReportStore,
        StoreError,
    };
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use serde_json::json;
    use tempfile::tempdir;

    fn fixture_report(name: &str, minute: u32) -> Report {
        let at = Utc
            .with_ymd_and_hms(2024, 3, 4, 9, minute, 0)
            .single()
            .expect("timestamp");
        Report::pending(name, format!("filesystem://{name}"), at)
    }

    #[tokio::test]
    async fn functional_report_store_persists_across_reopen() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("nested").join("reports.sqlite");
        let report = fixture_report("report_2024W10.txt", 0);
        {
            let store = SqliteReportStore::new(&db_path).expect("open store");
            store.put_report(report.clone()).await.expect("put report");
            store
                .complete_report(
                    &report.id,
                    ReportCompletion::Processed {
                        analysis_result: json!({"summary": "steady week"}),
                    },
                )
                .await
                .expect("complete report");
        }

        let reopened = SqliteReportStore::new(&db_path).expect("reopen store");
        let loaded = reopened.get_report(&report.id).await.expect("get report");
        assert_eq!(loaded.processing_status, ReportStatus::Processed);
        assert_eq!(
            loaded.analysis_result,
            Some(json!({"summary": "steady week"}))
        );
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.ingestion_timestamp, report.ingestion_timestamp);
    }

    #[tokio::test]
    async fn unit_report_store_get_missing_returns_not_found() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteReportStore::new(temp.path().join("reports.sqlite")).expect("open");
        let error = store.get_report("rpt-missing").await.expect_err("missing");
        assert!(matches!(error, StoreError::NotFound(id) if id == "rpt-missing"));
    }

    #[tokio::test]
    async fn regression_report_store_rejects_duplicate_ids() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteReportStore::new(temp.path().join("reports.sqlite")).expect("open");
        let report = fixture_report("a.txt", 1);
        store.put_report(report.clone()).await.expect("first put");
        let error = store.put_report(report).await.expect_err("duplicate");
        assert!(matches!(error, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn functional_report_store_lists_by_status_in_ingestion_order() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteReportStore::new(temp.path().join("reports.sqlite")).expect("open");
        let late = fixture_report("late.txt", 30);
        let early = fixture_report("early.txt", 5);
        let failed = fixture_report("broken.txt", 10);
        for report in [late.clone(), early.clone(), failed.clone()] {
            store.put_report(report).await.expect("put");
        }
        store
            .complete_report(
                &failed.id,
                ReportCompletion::Failed {
                    reason: "analysis timed out".to_string(),
                },
            )
            .await
            .expect("fail report");

        let pending = store
            .list_by_status(ReportQuery::with_status(ReportStatus::Pending))
            .await
            .expect("list pending");
        let names = pending
            .iter()
            .map(|report| report.source_filename.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["early.txt", "late.txt"]);

        let failed_rows = store
            .list_by_status(ReportQuery::with_status(ReportStatus::Failed))
            .await
            .expect("list failed");
        assert_eq!(failed_rows.len(), 1);
        assert_eq!(
            failed_rows[0].failure_reason.as_deref(),
            Some("analysis timed out")
        );

        let everything = store
            .list_by_status(ReportQuery {
                limit: Some(2),
                ..ReportQuery::default()
            })
            .await
            .expect("list all");
        assert_eq!(everything.len(), 2);

        let by_name = store
            .list_by_status(ReportQuery {
                source_filename: Some("late.txt".to_string()),
                ..ReportQuery::default()
            })
            .await
            .expect("list by name");
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].id, late.id);

        let none = store
            .list_by_status(ReportQuery {
                statuses: Some(Vec::new()),
                ..ReportQuery::default()
            })
            .await
            .expect("empty filter");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn regression_report_store_rejects_terminal_to_terminal_transition() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteReportStore::new(temp.path().join("reports.sqlite")).expect("open");
        let report = fixture_report("a.txt", 0);
        store.put_report(report.clone()).await.expect("put");
        store
            .complete_report(
                &report.id,
                ReportCompletion::Failed {
                    reason: "bad encoding".to_string(),
                },
            )
            .await
            .expect("fail");
        let error = store
            .complete_report(
                &report.id,
                ReportCompletion::Processed {
                    analysis_result: json!({}),
                },
            )
            .await
            .expect_err("terminal report must not be reprocessed");
        assert!(matches!(
            error,
            StoreError::InvalidTransition {
                from: ReportStatus::Failed,
                to: ReportStatus::Processed
            }
        ));
    }

    #[tokio::test]
    async fn functional_report_store_requeue_resets_report_and_clears_guard() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteReportStore::new(temp.path().join("reports.sqlite")).expect("open");
        let report = fixture_report("retry.txt", 0);
        store.put_report(report.clone()).await.expect("put");
        store
            .complete_report(
                &report.id,
                ReportCompletion::Failed {
                    reason: "upstream 503".to_string(),
                },
            )
            .await
            .expect("fail");
        store
            .record_processed_file(ProcessedFileRecord {
                source_filename: "retry.txt".to_string(),
                status: ReportStatus::Failed,
                location: "archive/_error".to_string(),
                report_id: Some(report.id.clone()),
                recorded_at: Utc::now(),
            })
            .await
            .expect("record");
        assert!(store
            .processed_filenames()
            .await
            .expect("names")
            .contains("retry.txt"));

        let requeued = store.requeue_report(&report.id).await.expect("requeue");
        assert_eq!(requeued.processing_status, ReportStatus::Pending);
        assert!(requeued.failure_reason.is_none());
        assert!(store
            .processed_file("retry.txt")
            .await
            .expect("lookup")
            .is_none());

        let error = store
            .requeue_report(&report.id)
            .await
            .expect_err("pending report cannot be requeued");
        assert!(matches!(error, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn unit_report_store_processed_file_record_upserts() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteReportStore::new(temp.path().join("reports.sqlite")).expect("open");
        let first_at = Utc::now() - ChronoDuration::minutes(5);
        store
            .record_processed_file(ProcessedFileRecord {
                source_filename: "a.txt".to_string(),
                status: ReportStatus::Failed,
                location: "error".to_string(),
                report_id: None,
                recorded_at: first_at,
            })
            .await
            .expect("first record");
        store
            .record_processed_file(ProcessedFileRecord {
                source_filename: "a.txt".to_string(),
                status: ReportStatus::Processed,
                location: "archive".to_string(),
                report_id: Some("rpt-1".to_string()),
                recorded_at: Utc::now(),
            })
            .await
            .expect("second record");
        let record = store
            .processed_file("a.txt")
            .await
            .expect("lookup")
            .expect("record exists");
        assert_eq!(record.status, ReportStatus::Processed);
        assert_eq!(record.location, "archive");
        assert_eq!(record.report_id.as_deref(), Some("rpt-1"));

        let error = store
            .record_processed_file(ProcessedFileRecord {
                source_filename: "b.txt".to_string(),
                status: ReportStatus::Pending,
                location: "archive".to_string(),
                report_id: None,
                recorded_at: Utc::now(),
            })
            .await
            .expect_err("pending guard rejected");
        assert!(matches!(error, StoreError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn regression_report_store_open_fails_fast_on_corrupt_file() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("reports.sqlite");
        std::fs::write(&db_path, vec![0x42_u8; 4096]).expect("write garbage");
        let error = SqliteReportStore::new(&db_path).expect_err("corrupt file");
        assert!(matches!(error, StoreError::Unavailable { store: "report_store", .. }));
        assert!(error.is_unavailable());
    }

    #[tokio::test]
    async fn unit_report_store_ping_succeeds_on_empty_store() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteReportStore::new(temp.path().join("reports.sqlite")).expect("open");
        store.ping().await.expect("ping");
        assert_eq!(
            store.location(),
            Some(temp.path().join("reports.sqlite"))
        );
    }
}
