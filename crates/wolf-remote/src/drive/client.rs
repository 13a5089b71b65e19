use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use wolf_core::truncate_for_error;

use super::{AccessTokenSource, DRIVE_FOLDER_MIME_TYPE};

const FILE_FIELDS: &str = "id,name,mimeType,parents,size,createdTime";
const LIST_PAGE_SIZE: &str = "100";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
    /// Drive reports sizes as decimal strings.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == DRIVE_FOLDER_MIME_TYPE
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|raw| raw.parse::<u64>().ok())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Thin Drive v3 REST client with bounded retries on transient failures.
#[derive(Clone)]
pub struct DriveApiClient {
    http: reqwest::Client,
    api_base: String,
    tokens: Arc<dyn AccessTokenSource>,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl DriveApiClient {
    pub fn new(
        api_base: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
        request_timeout: Duration,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("wolf-ingest"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout.max(Duration::from_millis(1)))
            .build()
            .context("failed to create drive api client")?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            tokens,
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    /// Lists direct children of `folder_id`, oldest first.
    pub async fn list_children(&self, folder_id: &str, files_only: bool) -> Result<Vec<DriveFile>> {
        let mut query = format!(
            "'{}' in parents and trashed = false",
            escape_query_literal(folder_id)
        );
        if files_only {
            query.push_str(&format!(" and mimeType != '{DRIVE_FOLDER_MIME_TYPE}'"));
        }
        self.list_files(&query).await
    }

    /// Finds a child folder of `parent_id` by exact name.
    pub async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<DriveFile>> {
        let query = format!(
            "'{}' in parents and name = '{}' and mimeType = '{DRIVE_FOLDER_MIME_TYPE}' and trashed = false",
            escape_query_literal(parent_id),
            escape_query_literal(name)
        );
        Ok(self.list_files(&query).await?.into_iter().next())
    }

    pub async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveFile> {
        let payload = json!({
            "name": name,
            "mimeType": DRIVE_FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });
        let url = format!("{}/files", self.api_base);
        self.request_json("files.create", |token| {
            self.http
                .post(&url)
                .bearer_auth(token)
                .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
                .json(&payload)
        })
        .await?
        .context("drive files.create returned not found")
    }

    /// Returns `None` when the file does not exist.
    pub async fn get_file(&self, file_id: &str) -> Result<Option<DriveFile>> {
        let url = format!("{}/files/{}", self.api_base, file_id);
        self.request_json("files.get", |token| {
            self.http
                .get(&url)
                .bearer_auth(token)
                .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
        })
        .await
    }

    /// Reparents a file in one PATCH. Returns `None` when the file is gone.
    pub async fn move_file(
        &self,
        file_id: &str,
        add_parent: &str,
        remove_parent: &str,
    ) -> Result<Option<DriveFile>> {
        let url = format!("{}/files/{}", self.api_base, file_id);
        self.request_json("files.update", |token| {
            self.http
                .patch(&url)
                .bearer_auth(token)
                .query(&[
                    ("addParents", add_parent),
                    ("removeParents", remove_parent),
                    ("fields", FILE_FIELDS),
                    ("supportsAllDrives", "true"),
                ])
                .json(&json!({}))
        })
        .await
    }

    /// Downloads file content. Returns `None` when the file is gone.
    pub async fn download(&self, file_id: &str) -> Result<Option<Vec<u8>>> {
        let url = format!("{}/files/{}", self.api_base, file_id);
        let response = self
            .send("files.download", |token| {
                self.http
                    .get(&url)
                    .bearer_auth(token)
                    .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            })
            .await?;
        let Some(response) = response else {
            return Ok(None);
        };
        let bytes = response
            .bytes()
            .await
            .context("failed to read drive file content")?;
        Ok(Some(bytes.to_vec()))
    }

    async fn list_files(&self, query: &str) -> Result<Vec<DriveFile>> {
        let url = format!("{}/files", self.api_base);
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let mut page_token: Option<String> = None;
        let mut files = Vec::new();
        loop {
            let page: DriveFileList = self
                .request_json("files.list", |token| {
                    let mut request = self.http.get(&url).bearer_auth(token).query(&[
                        ("q", query),
                        ("fields", fields.as_str()),
                        ("orderBy", "createdTime,name"),
                        ("pageSize", LIST_PAGE_SIZE),
                        ("supportsAllDrives", "true"),
                        ("includeItemsFromAllDrives", "true"),
                    ]);
                    if let Some(page_token) = page_token.as_deref() {
                        request = request.query(&[("pageToken", page_token)]);
                    }
                    request
                })
                .await?
                .context("drive files.list returned not found")?;
            files.extend(page.files);
            match page.next_page_token {
                Some(next) if !next.trim().is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(files)
    }

    async fn request_json<T, F>(&self, operation: &str, builder: F) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        F: FnMut(&str) -> reqwest::RequestBuilder,
    {
        let Some(response) = self.send(operation, builder).await? else {
            return Ok(None);
        };
        let parsed = response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode drive {operation}"))?;
        Ok(Some(parsed))
    }

    /// Sends with retries. A 404 resolves to `Ok(None)`.
    async fn send<F>(&self, operation: &str, mut builder: F) -> Result<Option<reqwest::Response>>
    where
        F: FnMut(&str) -> reqwest::RequestBuilder,
    {
        let token = self
            .tokens
            .access_token()
            .await
            .with_context(|| format!("failed to obtain access token for drive {operation}"))?;
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder(&token)
                .header("x-wolf-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(Some(response));
                    }
                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts && is_retryable_drive_status(status.as_u16())
                    {
                        tracing::debug!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            "retrying drive request"
                        );
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }
                    bail!(
                        "drive api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&body, 800)
                    );
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("drive api {operation} request failed"));
                }
            }
        }
    }
}

fn escape_query_literal(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?;
    let seconds = raw.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(seconds))
}

fn retry_delay(base_delay_ms: u64, attempt: usize, retry_after: Option<Duration>) -> Duration {
    if let Some(delay) = retry_after {
        return delay.max(Duration::from_millis(base_delay_ms));
    }
    let exponent = attempt.saturating_sub(1).min(10) as u32;
    let scaled = base_delay_ms.saturating_mul(2_u64.saturating_pow(exponent));
    Duration::from_millis(scaled.min(30_000))
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

fn is_retryable_drive_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}
