use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::{AccessTokenSource, DriveApiClient, DriveFile};
use crate::{
    exclude_processed, ClaimedFile, FinalizeOutcome, FinalizedFile, RemoteError, RemoteFile,
    RemoteFolderGateway, RemoteResult,
};

const PROCESSING_FOLDER_NAME: &str = "_processing";
const ERROR_FOLDER_NAME: &str = "_error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveFolderGatewayConfig {
    pub api_base: String,
    pub inbox_folder_id: String,
    pub archive_folder_id: String,
    /// When unset, a `_processing` folder under the archive is found or created.
    pub processing_folder_id: Option<String>,
    /// When unset, an `_error` folder under the archive is found or created.
    pub error_folder_id: Option<String>,
    pub request_timeout: Duration,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

/// Folder gateway backed by Drive parent relationships.
///
/// A claim reads the file's parents and then swaps the inbox parent for the
/// processing parent with `files.update`. Drive offers no compare-and-swap on
/// parents, so two pollers inside that window can both succeed. The move does
/// not guarantee at-most-once processing; the store's processed-file record
/// is what keeps a recorded filename out of every later listing.
pub struct DriveFolderGateway {
    client: DriveApiClient,
    inbox_folder_id: String,
    archive_folder_id: String,
    configured_processing: Option<String>,
    configured_error: Option<String>,
    processing_folder: OnceCell<String>,
    error_folder: OnceCell<String>,
}

impl DriveFolderGateway {
    pub fn new(
        config: DriveFolderGatewayConfig,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> anyhow::Result<Self> {
        let client = DriveApiClient::new(
            config.api_base,
            tokens,
            config.request_timeout,
            config.retry_max_attempts,
            config.retry_base_delay_ms,
        )?;
        Ok(Self {
            client,
            inbox_folder_id: config.inbox_folder_id,
            archive_folder_id: config.archive_folder_id,
            configured_processing: config.processing_folder_id,
            configured_error: config.error_folder_id,
            processing_folder: OnceCell::new(),
            error_folder: OnceCell::new(),
        })
    }

    async fn processing_folder(&self, operation: &'static str) -> RemoteResult<&str> {
        self.processing_folder
            .get_or_try_init(|| {
                self.resolve_folder(self.configured_processing.as_deref(), PROCESSING_FOLDER_NAME)
            })
            .await
            .map(String::as_str)
            .map_err(|error| RemoteError::unavailable(operation, format!("{error:#}")))
    }

    async fn error_folder(&self, operation: &'static str) -> RemoteResult<&str> {
        self.error_folder
            .get_or_try_init(|| {
                self.resolve_folder(self.configured_error.as_deref(), ERROR_FOLDER_NAME)
            })
            .await
            .map(String::as_str)
            .map_err(|error| RemoteError::unavailable(operation, format!("{error:#}")))
    }

    async fn resolve_folder(&self, configured: Option<&str>, name: &str) -> anyhow::Result<String> {
        if let Some(id) = configured {
            return Ok(id.to_string());
        }
        if let Some(existing) = self
            .client
            .find_folder(&self.archive_folder_id, name)
            .await?
        {
            return Ok(existing.id);
        }
        let created = self
            .client
            .create_folder(&self.archive_folder_id, name)
            .await?;
        tracing::info!(folder = name, id = %created.id, "created drive folder under archive");
        Ok(created.id)
    }
}

fn to_remote_file(file: DriveFile) -> RemoteFile {
    RemoteFile {
        size_bytes: file.size_bytes(),
        created_at: file.created_time,
        id: file.id,
        name: file.name,
    }
}

fn unavailable(operation: &'static str, error: anyhow::Error) -> RemoteError {
    RemoteError::unavailable(operation, format!("{error:#}"))
}

#[async_trait]
impl RemoteFolderGateway for DriveFolderGateway {
    fn backend(&self) -> &'static str {
        "drive"
    }

    fn destination(&self, outcome: FinalizeOutcome) -> String {
        match outcome {
            FinalizeOutcome::Success => self.archive_folder_id.clone(),
            FinalizeOutcome::Failure => match self.configured_error.as_ref() {
                Some(id) => id.clone(),
                None => format!("{}/{ERROR_FOLDER_NAME}", self.archive_folder_id),
            },
        }
    }

    async fn list_new_files(&self, processed: &HashSet<String>) -> RemoteResult<Vec<RemoteFile>> {
        let files = self
            .client
            .list_children(&self.inbox_folder_id, true)
            .await
            .map_err(|error| unavailable("list_new_files", error))?;
        let files = files.into_iter().map(to_remote_file).collect();
        Ok(exclude_processed(files, processed))
    }

    async fn claim(&self, file: &RemoteFile) -> RemoteResult<ClaimedFile> {
        let processing = self.processing_folder("claim").await?;
        let current = self
            .client
            .get_file(&file.id)
            .await
            .map_err(|error| unavailable("claim", error))?;
        let in_inbox = current
            .as_ref()
            .is_some_and(|current| current.parents.iter().any(|id| id == &self.inbox_folder_id));
        if !in_inbox {
            return Err(RemoteError::AlreadyClaimed(file.name.clone()));
        }
        let moved = self
            .client
            .move_file(&file.id, processing, &self.inbox_folder_id)
            .await
            .map_err(|error| unavailable("claim", error))?;
        if moved.is_none() {
            return Err(RemoteError::AlreadyClaimed(file.name.clone()));
        }
        tracing::debug!(file = %file.name, id = %file.id, "claimed drive file");
        Ok(ClaimedFile {
            file: file.clone(),
            in_progress_ref: processing.to_string(),
        })
    }

    async fn read(&self, claimed: &ClaimedFile) -> RemoteResult<Vec<u8>> {
        self.client
            .download(&claimed.file.id)
            .await
            .map_err(|error| unavailable("read", error))?
            .ok_or_else(|| RemoteError::NotFound(claimed.file.name.clone()))
    }

    async fn finalize(
        &self,
        claimed: &ClaimedFile,
        outcome: FinalizeOutcome,
    ) -> RemoteResult<FinalizedFile> {
        let processing = self.processing_folder("finalize").await?;
        let target = match outcome {
            FinalizeOutcome::Success => self.archive_folder_id.as_str(),
            FinalizeOutcome::Failure => self.error_folder("finalize").await?,
        };
        self.client
            .move_file(&claimed.file.id, target, processing)
            .await
            .map_err(|error| unavailable("finalize", error))?
            .ok_or_else(|| RemoteError::NotFound(claimed.file.name.clone()))?;
        Ok(FinalizedFile {
            name: claimed.file.name.clone(),
            location: target.to_string(),
        })
    }

    async fn list_in_progress(&self) -> RemoteResult<Vec<ClaimedFile>> {
        let processing = self.processing_folder("list_in_progress").await?;
        let files = self
            .client
            .list_children(processing, true)
            .await
            .map_err(|error| unavailable("list_in_progress", error))?;
        Ok(files
            .into_iter()
            .map(|file| ClaimedFile {
                file: to_remote_file(file),
                in_progress_ref: processing.to_string(),
            })
            .collect())
    }

    async fn probe(&self) -> RemoteResult<()> {
        let inbox = self
            .client
            .get_file(&self.inbox_folder_id)
            .await
            .map_err(|error| unavailable("probe", error))?;
        match inbox {
            Some(folder) if folder.is_folder() => Ok(()),
            Some(_) => Err(RemoteError::unavailable(
                "probe",
                format!("inbox {} is not a folder", self.inbox_folder_id),
            )),
            None => Err(RemoteError::unavailable(
                "probe",
                format!("inbox folder {} not found", self.inbox_folder_id),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DriveFolderGateway, DriveFolderGatewayConfig};
    use crate::drive::StaticAccessToken;
    use crate::{FinalizeOutcome, RemoteError, RemoteFile, RemoteFolderGateway};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn gateway(server: &MockServer, error_folder: Option<&str>) -> DriveFolderGateway {
        DriveFolderGateway::new(
            DriveFolderGatewayConfig {
                api_base: server.base_url(),
                inbox_folder_id: "inbox".to_string(),
                archive_folder_id: "archive".to_string(),
                processing_folder_id: Some("processing".to_string()),
                error_folder_id: error_folder.map(str::to_string),
                request_timeout: Duration::from_secs(2),
                retry_max_attempts: 1,
                retry_base_delay_ms: 1,
            },
            Arc::new(StaticAccessToken::new("drive-token")),
        )
        .expect("gateway")
    }

    fn weekly_report() -> RemoteFile {
        RemoteFile {
            id: "file-1".to_string(),
            name: "report_2024W10.txt".to_string(),
            size_bytes: Some(6),
            created_at: None,
        }
    }

    #[tokio::test]
    async fn functional_drive_gateway_claims_reads_and_archives() {
        let server = MockServer::start();
        let lookup = server.mock(|when, then| {
            when.method(GET)
                .path("/files/file-1")
                .query_param("fields", "id,name,mimeType,parents,size,createdTime");
            then.status(200).json_body(json!({
                "id": "file-1", "name": "report_2024W10.txt", "parents": ["inbox"]
            }));
        });
        let claim = server.mock(|when, then| {
            when.method(PATCH)
                .path("/files/file-1")
                .query_param("addParents", "processing")
                .query_param("removeParents", "inbox");
            then.status(200).json_body(json!({
                "id": "file-1", "name": "report_2024W10.txt", "parents": ["processing"]
            }));
        });
        let download = server.mock(|when, then| {
            when.method(GET).path("/files/file-1").query_param("alt", "media");
            then.status(200).body("weekly");
        });
        let archive = server.mock(|when, then| {
            when.method(PATCH)
                .path("/files/file-1")
                .query_param("addParents", "archive")
                .query_param("removeParents", "processing");
            then.status(200).json_body(json!({
                "id": "file-1", "name": "report_2024W10.txt", "parents": ["archive"]
            }));
        });

        let gateway = gateway(&server, None);
        let claimed = gateway.claim(&weekly_report()).await.expect("claim");
        assert_eq!(claimed.in_progress_ref, "processing");
        assert_eq!(gateway.read(&claimed).await.expect("read"), b"weekly");
        let finalized = gateway
            .finalize(&claimed, FinalizeOutcome::Success)
            .await
            .expect("finalize");
        assert_eq!(finalized.location, "archive");
        lookup.assert_calls(1);
        claim.assert_calls(1);
        download.assert_calls(1);
        archive.assert_calls(1);
    }

    #[tokio::test]
    async fn regression_drive_gateway_file_outside_inbox_is_already_claimed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/files/file-1");
            then.status(200).json_body(json!({
                "id": "file-1", "name": "report_2024W10.txt", "parents": ["processing"]
            }));
        });
        let patch = server.mock(|when, then| {
            when.method(PATCH).path("/files/file-1");
            then.status(200).json_body(json!({"id": "file-1", "name": "x"}));
        });

        let error = gateway(&server, None)
            .claim(&weekly_report())
            .await
            .expect_err("already claimed");
        assert!(matches!(error, RemoteError::AlreadyClaimed(_)));
        patch.assert_calls(0);
    }

    #[tokio::test]
    async fn functional_drive_gateway_creates_error_folder_when_missing() {
        let server = MockServer::start();
        let find = server.mock(|when, then| {
            when.method(GET).path("/files");
            then.status(200).json_body(json!({"files": []}));
        });
        let create = server.mock(|when, then| {
            when.method(POST).path("/files").body_includes("\"_error\"");
            then.status(200).json_body(json!({
                "id": "error-folder",
                "name": "_error",
                "mimeType": "application/vnd.google-apps.folder",
                "parents": ["archive"]
            }));
        });
        let relocate = server.mock(|when, then| {
            when.method(PATCH)
                .path("/files/file-1")
                .query_param("addParents", "error-folder")
                .query_param("removeParents", "processing");
            then.status(200).json_body(json!({"id": "file-1", "name": "report_2024W10.txt"}));
        });

        let gateway = gateway(&server, None);
        assert_eq!(gateway.destination(FinalizeOutcome::Failure), "archive/_error");
        let claimed = crate::ClaimedFile {
            file: weekly_report(),
            in_progress_ref: "processing".to_string(),
        };
        let finalized = gateway
            .finalize(&claimed, FinalizeOutcome::Failure)
            .await
            .expect("finalize failure");
        assert_eq!(finalized.location, "error-folder");
        find.assert_calls(1);
        create.assert_calls(1);
        relocate.assert_calls(1);
    }

    #[tokio::test]
    async fn regression_drive_gateway_outage_maps_to_unavailable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/files");
            then.status(503).body("backend error");
        });
        server.mock(|when, then| {
            when.method(GET).path("/files/inbox");
            then.status(503).body("backend error");
        });
        let gateway = gateway(&server, Some("errors"));
        let error = gateway
            .list_new_files(&HashSet::new())
            .await
            .expect_err("outage");
        assert!(error.is_unavailable());
        assert!(error.to_string().contains("status 503"));
        assert!(gateway.probe().await.expect_err("probe").is_unavailable());
        assert_eq!(gateway.destination(FinalizeOutcome::Failure), "errors");
    }

    #[tokio::test]
    async fn functional_drive_gateway_probe_accepts_folder() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/files/inbox");
            then.status(200).json_body(json!({
                "id": "inbox",
                "name": "Inbox",
                "mimeType": "application/vnd.google-apps.folder"
            }));
        });
        gateway(&server, None).probe().await.expect("probe");
    }
}
