//! Remote folder access for report ingestion.
//!
//! `RemoteFolderGateway` lists an inbox, claims files into an in-progress
//! location, and relocates them to an archive or error location once
//! processed. Backends: mounted directories, Google Drive, and a disabled
//! gateway for ephemeral mode.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

mod disabled;
pub mod drive;
mod local_folder;

pub use disabled::DisabledFolderGateway;
pub use drive::{
    AccessTokenSource, DriveFolderGateway, DriveFolderGatewayConfig, ServiceAccountTokenSource,
    StaticAccessToken,
};
pub use local_folder::LocalFolderGateway;

/// Result type for remote folder operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote storage unavailable during {operation}: {reason}")]
    Unavailable {
        operation: &'static str,
        reason: String,
    },
    #[error("file '{0}' is already claimed")]
    AlreadyClaimed(String),
    #[error("remote file '{0}' not found")]
    NotFound(String),
    #[error("remote storage is disabled in ephemeral mode")]
    Disabled,
}

impl RemoteError {
    pub fn unavailable(operation: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            operation,
            reason: reason.to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// A file present in the inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    /// Backend identifier: a Drive file id or the file name for directories.
    pub id: String,
    pub name: String,
    pub size_bytes: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl RemoteFile {
    /// Reference that stays valid as the file moves between folders.
    pub fn content_reference(&self, backend: &str) -> String {
        format!("{backend}://{}", self.id)
    }
}

/// A file moved out of the inbox into the in-progress location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimedFile {
    pub file: RemoteFile,
    pub in_progress_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeOutcome {
    Success,
    Failure,
}

/// Where a claimed file ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizedFile {
    pub name: String,
    pub location: String,
}

/// Async contract wrapping every remote-storage call made during ingestion.
#[async_trait]
pub trait RemoteFolderGateway: Send + Sync {
    /// Short backend label used in content references and health output.
    fn backend(&self) -> &'static str;

    /// Location label a file is sent to for `outcome`.
    fn destination(&self, outcome: FinalizeOutcome) -> String;

    /// Files currently in the inbox whose names are not in `processed`.
    async fn list_new_files(&self, processed: &HashSet<String>) -> RemoteResult<Vec<RemoteFile>>;

    /// Atomically moves `file` out of the inbox. A file that is no longer in
    /// the inbox yields `RemoteError::AlreadyClaimed`.
    async fn claim(&self, file: &RemoteFile) -> RemoteResult<ClaimedFile>;

    async fn read(&self, claimed: &ClaimedFile) -> RemoteResult<Vec<u8>>;

    /// Moves a claimed file to the archive on success or the error location on failure.
    async fn finalize(
        &self,
        claimed: &ClaimedFile,
        outcome: FinalizeOutcome,
    ) -> RemoteResult<FinalizedFile>;

    /// Files sitting in the in-progress location.
    async fn list_in_progress(&self) -> RemoteResult<Vec<ClaimedFile>>;

    /// Cheap reachability check.
    async fn probe(&self) -> RemoteResult<()>;
}

pub(crate) fn exclude_processed(
    mut files: Vec<RemoteFile>,
    processed: &HashSet<String>,
) -> Vec<RemoteFile> {
    files.retain(|file| {
        let keep = !processed.contains(&file.name);
        if !keep {
            tracing::debug!(file = %file.name, "skipping file with processed record");
        }
        keep
    });
    files
}
