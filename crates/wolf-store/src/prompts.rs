//! SQLite-backed `PromptStore` implementation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::sqlite_support::{
    lock_writer, open_connection, open_writer, run_blocking, timestamp_from_db, timestamp_to_db,
    usize_to_i64, DEFAULT_BUSY_TIMEOUT,
};
use crate::{PromptKind, PromptRecord, PromptStore, StoreError, StoreResult};

const STORE_NAME: &str = "prompt_store";

const PROMPT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS prompt_records (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    name TEXT NULL UNIQUE,
    session_id TEXT NULL,
    role TEXT NULL,
    category TEXT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_prompt_records_session ON prompt_records (session_id, created_at);
"#;

const PROMPT_COLUMNS: &str =
    "id, kind, name, session_id, role, category, content, created_at, updated_at";

/// Prompt store owning its own SQLite file and writer connection.
#[derive(Debug, Clone)]
pub struct SqlitePromptStore {
    db: Arc<PromptDb>,
}

#[derive(Debug)]
struct PromptDb {
    db_path: PathBuf,
    busy_timeout: Duration,
    writer: Mutex<Connection>,
}

impl SqlitePromptStore {
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn with_busy_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        let writer = open_writer(STORE_NAME, &db_path, busy_timeout, PROMPT_SCHEMA)?;
        Ok(Self {
            db: Arc::new(PromptDb {
                db_path,
                busy_timeout,
                writer: Mutex::new(writer),
            }),
        })
    }
}

#[async_trait]
impl PromptStore for SqlitePromptStore {
    async fn put_prompt(&self, record: PromptRecord) -> StoreResult<PromptRecord> {
        let db = self.db.clone();
        run_blocking(STORE_NAME, move || db.put_prompt(record)).await
    }

    async fn get_prompt(&self, prompt_id: &str) -> StoreResult<PromptRecord> {
        let db = self.db.clone();
        let prompt_id = prompt_id.to_string();
        run_blocking(STORE_NAME, move || db.get_prompt(&prompt_id)).await
    }

    async fn get_template(&self, name: &str) -> StoreResult<PromptRecord> {
        let db = self.db.clone();
        let name = name.to_string();
        run_blocking(STORE_NAME, move || db.get_template(&name)).await
    }

    async fn list_templates(&self, limit: usize, offset: usize) -> StoreResult<Vec<PromptRecord>> {
        let db = self.db.clone();
        run_blocking(STORE_NAME, move || db.list_templates(limit, offset)).await
    }

    async fn list_conversation(&self, session_id: &str) -> StoreResult<Vec<PromptRecord>> {
        let db = self.db.clone();
        let session_id = session_id.to_string();
        run_blocking(STORE_NAME, move || db.list_conversation(&session_id)).await
    }

    async fn ping(&self) -> StoreResult<()> {
        let db = self.db.clone();
        run_blocking(STORE_NAME, move || db.ping()).await
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.db.db_path.clone())
    }
}

impl PromptDb {
    fn open_reader(&self) -> StoreResult<Connection> {
        open_connection(&self.db_path, self.busy_timeout)
    }

    fn query_records(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<PromptRecord>> {
        let connection = self.open_reader()?;
        let mut statement = connection.prepare(sql)?;
        let rows = statement
            .query_map(params, PromptRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(PromptRow::into_record).collect()
    }

    fn put_prompt(&self, record: PromptRecord) -> StoreResult<PromptRecord> {
        validate_prompt(&record)?;
        let connection = lock_writer(STORE_NAME, &self.writer)?;
        connection.execute(
            r#"
            INSERT INTO prompt_records (
                id, kind, name, session_id, role, category, content, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                category = excluded.category,
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
            params![
                record.id,
                record.kind.as_str(),
                record.name,
                record.session_id,
                record.role,
                record.category,
                record.content,
                timestamp_to_db(record.created_at),
                timestamp_to_db(record.updated_at),
            ],
        )?;
        let stored = connection
            .query_row(
                &format!("SELECT {PROMPT_COLUMNS} FROM prompt_records WHERE id = ?1"),
                params![record.id],
                PromptRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
        stored.into_record()
    }

    fn get_prompt(&self, prompt_id: &str) -> StoreResult<PromptRecord> {
        self.query_records(
            &format!("SELECT {PROMPT_COLUMNS} FROM prompt_records WHERE id = ?1"),
            params![prompt_id],
        )?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::NotFound(prompt_id.to_string()))
    }

    fn get_template(&self, name: &str) -> StoreResult<PromptRecord> {
        self.query_records(
            &format!(
                "SELECT {PROMPT_COLUMNS} FROM prompt_records WHERE kind = 'template' AND name = ?1"
            ),
            params![name],
        )?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn list_templates(&self, limit: usize, offset: usize) -> StoreResult<Vec<PromptRecord>> {
        self.query_records(
            &format!(
                "SELECT {PROMPT_COLUMNS} FROM prompt_records WHERE kind = 'template' \
                 ORDER BY name ASC LIMIT ?1 OFFSET ?2"
            ),
            params![usize_to_i64(limit), usize_to_i64(offset)],
        )
    }

    fn list_conversation(&self, session_id: &str) -> StoreResult<Vec<PromptRecord>> {
        self.query_records(
            &format!(
                "SELECT {PROMPT_COLUMNS} FROM prompt_records \
                 WHERE kind = 'conversation_turn' AND session_id = ?1 \
                 ORDER BY created_at ASC, rowid ASC"
            ),
            params![session_id],
        )
    }

    fn ping(&self) -> StoreResult<()> {
        let connection = self.open_reader()?;
        connection
            .query_row("SELECT 1 FROM prompt_records LIMIT 1", [], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?;
        Ok(())
    }
}

fn validate_prompt(record: &PromptRecord) -> StoreResult<()> {
    if record.content.trim().is_empty() {
        return Err(StoreError::InvalidRecord(
            "prompt content must not be empty".to_string(),
        ));
    }
    match record.kind {
        PromptKind::Template if record.name.as_deref().map_or(true, str::is_empty) => Err(
            StoreError::InvalidRecord("prompt templates require a name".to_string()),
        ),
        PromptKind::ConversationTurn if record.session_id.as_deref().map_or(true, str::is_empty) => {
            Err(StoreError::InvalidRecord(
                "conversation turns require a session id".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

struct PromptRow {
    id: String,
    kind: String,
    name: Option<String>,
    session_id: Option<String>,
    role: Option<String>,
    category: Option<String>,
    content: String,
    created_at: String,
    updated_at: String,
}

impl PromptRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            name: row.get(2)?,
            session_id: row.get(3)?,
            role: row.get(4)?,
            category: row.get(5)?,
            content: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_record(self) -> StoreResult<PromptRecord> {
        Ok(PromptRecord {
            id: self.id,
            kind: self.kind.parse()?,
            name: self.name,
            session_id: self.session_id,
            role: self.role,
            category: self.category,
            content: self.content,
            created_at: timestamp_from_db(&self.created_at)?,
            updated_at: timestamp_from_db(&self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::SqlitePromptStore;
    use crate::{PromptRecord, PromptStore, SqliteReportStore, StoreError};
    use tempfile::tempdir;

    #[tokio::test]
    async fn functional_prompt_store_upserts_templates_by_name() {
        let temp = tempdir().expect("tempdir");
        let store = SqlitePromptStore::new(temp.path().join("prompts.sqlite")).expect("open");
        let first = store
            .put_prompt(PromptRecord::template(
                "weekly_summary",
                "Summarize the week.",
                None,
            ))
            .await
            .expect("put first");
        let second = store
            .put_prompt(PromptRecord::template(
                "weekly_summary",
                "Summarize the week in three bullets.",
                Some("reports".to_string()),
            ))
            .await
            .expect("put second");
        assert_eq!(first.id, second.id);
        assert_eq!(second.created_at, first.created_at);

        let loaded = store.get_template("weekly_summary").await.expect("get");
        assert_eq!(loaded.content, "Summarize the week in three bullets.");
        assert_eq!(loaded.category.as_deref(), Some("reports"));
        let by_id = store.get_prompt(&first.id).await.expect("get by id");
        assert_eq!(by_id, loaded);
    }

    #[tokio::test]
    async fn functional_prompt_store_lists_templates_by_name_with_paging() {
        let temp = tempdir().expect("tempdir");
        let store = SqlitePromptStore::new(temp.path().join("prompts.sqlite")).expect("open");
        for name in ["gamma", "alpha", "beta"] {
            store
                .put_prompt(PromptRecord::template(name, format!("{name} body"), None))
                .await
                .expect("put");
        }
        store
            .put_prompt(PromptRecord::conversation_turn("s-1", "user", "hi"))
            .await
            .expect("put turn");

        let page = store.list_templates(2, 0).await.expect("page one");
        let names = page
            .iter()
            .filter_map(|record| record.name.as_deref())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["alpha", "beta"]);
        let rest = store.list_templates(10, 2).await.expect("page two");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name.as_deref(), Some("gamma"));
    }

    #[tokio::test]
    async fn functional_prompt_store_keeps_conversation_turn_order() {
        let temp = tempdir().expect("tempdir");
        let store = SqlitePromptStore::new(temp.path().join("prompts.sqlite")).expect("open");
        for (role, content) in [("user", "first"), ("assistant", "second"), ("user", "third")] {
            store
                .put_prompt(PromptRecord::conversation_turn("session-a", role, content))
                .await
                .expect("put turn");
        }
        store
            .put_prompt(PromptRecord::conversation_turn("session-b", "user", "other"))
            .await
            .expect("put other session");

        let turns = store.list_conversation("session-a").await.expect("list");
        let contents = turns
            .iter()
            .map(|turn| turn.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn regression_prompt_store_rejects_empty_content_and_missing_keys() {
        let temp = tempdir().expect("tempdir");
        let store = SqlitePromptStore::new(temp.path().join("prompts.sqlite")).expect("open");
        let error = store
            .put_prompt(PromptRecord::template("empty", "   ", None))
            .await
            .expect_err("empty content");
        assert!(matches!(error, StoreError::InvalidRecord(_)));

        let error = store
            .put_prompt(PromptRecord::conversation_turn("", "user", "hello"))
            .await
            .expect_err("missing session");
        assert!(matches!(error, StoreError::InvalidRecord(_)));

        let error = store.get_template("absent").await.expect_err("missing");
        assert!(matches!(error, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn integration_prompt_store_serves_while_report_store_file_is_corrupt() {
        let temp = tempdir().expect("tempdir");
        let reports_path = temp.path().join("reports.sqlite");
        std::fs::write(&reports_path, vec![0x17_u8; 2048]).expect("write garbage");
        let report_error = SqliteReportStore::new(&reports_path).expect_err("corrupt");
        assert!(report_error.is_unavailable());

        let prompts = SqlitePromptStore::new(temp.path().join("prompts.sqlite")).expect("open");
        prompts.ping().await.expect("prompt store ping");
        prompts
            .put_prompt(PromptRecord::template("still_works", "yes", None))
            .await
            .expect("put");
    }
}
