//! Directory-backed gateway for mounted remote storage.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use wolf_core::current_unix_timestamp_ms;

use crate::{
    exclude_processed, ClaimedFile, FinalizeOutcome, FinalizedFile, RemoteError, RemoteFile,
    RemoteFolderGateway, RemoteResult,
};

const DEFAULT_PROCESSING_DIR: &str = ".processing";
const DEFAULT_ERROR_DIR: &str = "_error";

/// Gateway over plain directories. Claims are atomic `rename` calls, so two
/// pollers sharing the same mount cannot both claim one file.
#[derive(Debug, Clone)]
pub struct LocalFolderGateway {
    inbox: PathBuf,
    archive: PathBuf,
    processing: PathBuf,
    error: PathBuf,
}

impl LocalFolderGateway {
    /// Processing defaults to `<inbox>/.processing`, errors to `<archive>/_error`.
    pub fn new(
        inbox: impl Into<PathBuf>,
        archive: impl Into<PathBuf>,
        processing: Option<PathBuf>,
        error: Option<PathBuf>,
    ) -> Self {
        let inbox = inbox.into();
        let archive = archive.into();
        let processing = processing.unwrap_or_else(|| inbox.join(DEFAULT_PROCESSING_DIR));
        let error = error.unwrap_or_else(|| archive.join(DEFAULT_ERROR_DIR));
        Self {
            inbox,
            archive,
            processing,
            error,
        }
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    pub fn archive(&self) -> &Path {
        &self.archive
    }

    pub fn processing(&self) -> &Path {
        &self.processing
    }

    pub fn error_dir(&self) -> &Path {
        &self.error
    }

    fn destination_dir(&self, outcome: FinalizeOutcome) -> &Path {
        match outcome {
            FinalizeOutcome::Success => &self.archive,
            FinalizeOutcome::Failure => &self.error,
        }
    }
}

#[async_trait]
impl RemoteFolderGateway for LocalFolderGateway {
    fn backend(&self) -> &'static str {
        "filesystem"
    }

    fn destination(&self, outcome: FinalizeOutcome) -> String {
        self.destination_dir(outcome).display().to_string()
    }

    async fn list_new_files(&self, processed: &HashSet<String>) -> RemoteResult<Vec<RemoteFile>> {
        let files = list_regular_files(&self.inbox)
            .await
            .map_err(|error| RemoteError::unavailable("list_new_files", error))?;
        Ok(exclude_processed(files, processed))
    }

    async fn claim(&self, file: &RemoteFile) -> RemoteResult<ClaimedFile> {
        tokio::fs::create_dir_all(&self.processing)
            .await
            .map_err(|error| RemoteError::unavailable("claim", error))?;
        let source = self.inbox.join(&file.name);
        let target = self.processing.join(&file.name);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(RemoteError::AlreadyClaimed(file.name.clone()));
        }
        match tokio::fs::rename(&source, &target).await {
            Ok(()) => {
                tracing::debug!(file = %file.name, "claimed file");
                Ok(ClaimedFile {
                    file: file.clone(),
                    in_progress_ref: target.display().to_string(),
                })
            }
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(RemoteError::AlreadyClaimed(file.name.clone()))
            }
            Err(error) => Err(RemoteError::unavailable("claim", error)),
        }
    }

    async fn read(&self, claimed: &ClaimedFile) -> RemoteResult<Vec<u8>> {
        let path = self.processing.join(&claimed.file.name);
        tokio::fs::read(&path).await.map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                RemoteError::NotFound(claimed.file.name.clone())
            } else {
                RemoteError::unavailable("read", error)
            }
        })
    }

    async fn finalize(
        &self,
        claimed: &ClaimedFile,
        outcome: FinalizeOutcome,
    ) -> RemoteResult<FinalizedFile> {
        let source = self.processing.join(&claimed.file.name);
        let directory = self.destination_dir(outcome);
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|error| RemoteError::unavailable("finalize", error))?;
        let target = unique_destination(directory, &claimed.file.name).await;
        move_file(&source, &target).await.map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                RemoteError::NotFound(claimed.file.name.clone())
            } else {
                RemoteError::unavailable("finalize", error)
            }
        })?;
        Ok(FinalizedFile {
            name: claimed.file.name.clone(),
            location: target.display().to_string(),
        })
    }

    async fn list_in_progress(&self) -> RemoteResult<Vec<ClaimedFile>> {
        if !tokio::fs::try_exists(&self.processing).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let files = list_regular_files(&self.processing)
            .await
            .map_err(|error| RemoteError::unavailable("list_in_progress", error))?;
        Ok(files
            .into_iter()
            .map(|file| ClaimedFile {
                in_progress_ref: self.processing.join(&file.name).display().to_string(),
                file,
            })
            .collect())
    }

    async fn probe(&self) -> RemoteResult<()> {
        for (label, path) in [("inbox", &self.inbox), ("archive", &self.archive)] {
            let metadata = tokio::fs::metadata(path).await.map_err(|error| {
                RemoteError::unavailable("probe", format!("{label} {}: {error}", path.display()))
            })?;
            if !metadata.is_dir() {
                return Err(RemoteError::unavailable(
                    "probe",
                    format!("{label} {} is not a directory", path.display()),
                ));
            }
        }
        Ok(())
    }
}

async fn list_regular_files(directory: &Path) -> std::io::Result<Vec<RemoteFile>> {
    let mut entries = tokio::fs::read_dir(directory).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let created_at = metadata
            .created()
            .or_else(|_| metadata.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        files.push(RemoteFile {
            id: name.clone(),
            name,
            size_bytes: Some(metadata.len()),
            created_at,
        });
    }
    files.sort_by(|left, right| {
        left.created_at
            .cmp(&right.created_at)
            .then_with(|| left.name.cmp(&right.name))
    });
    Ok(files)
}

async fn unique_destination(directory: &Path, name: &str) -> PathBuf {
    let candidate = directory.join(name);
    if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    let suffix = current_unix_timestamp_ms();
    let renamed = match path.extension() {
        Some(extension) => format!("{stem}-{suffix}.{}", extension.to_string_lossy()),
        None => format!("{stem}-{suffix}"),
    };
    directory.join(renamed)
}

async fn move_file(source: &Path, target: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(source, target).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Err(error),
        Err(_) => {
            // Different mounts: fall back to copy then remove.
            tokio::fs::copy(source, target).await?;
            tokio::fs::remove_file(source).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LocalFolderGateway;
    use crate::{FinalizeOutcome, RemoteError, RemoteFolderGateway};
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn gateway(root: &std::path::Path) -> LocalFolderGateway {
        std::fs::create_dir_all(root.join("inbox")).expect("create inbox");
        std::fs::create_dir_all(root.join("archive")).expect("create archive");
        LocalFolderGateway::new(root.join("inbox"), root.join("archive"), None, None)
    }

    #[tokio::test]
    async fn functional_local_gateway_lists_claims_and_archives() {
        let temp = tempdir().expect("tempdir");
        let gateway = gateway(temp.path());
        std::fs::write(temp.path().join("inbox/report_2024W10.txt"), "weekly").expect("write");
        std::fs::write(temp.path().join("inbox/.hidden"), "skip").expect("write hidden");

        let files = gateway
            .list_new_files(&HashSet::new())
            .await
            .expect("list files");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "report_2024W10.txt");
        assert_eq!(
            files[0].content_reference(gateway.backend()),
            "filesystem://report_2024W10.txt"
        );

        let claimed = gateway.claim(&files[0]).await.expect("claim");
        assert!(!temp.path().join("inbox/report_2024W10.txt").exists());
        assert!(gateway.processing().join("report_2024W10.txt").exists());
        assert_eq!(gateway.read(&claimed).await.expect("read"), b"weekly");

        let finalized = gateway
            .finalize(&claimed, FinalizeOutcome::Success)
            .await
            .expect("finalize");
        assert!(temp.path().join("archive/report_2024W10.txt").exists());
        assert_eq!(
            finalized.location,
            temp.path().join("archive/report_2024W10.txt").display().to_string()
        );
        assert!(gateway
            .list_in_progress()
            .await
            .expect("in progress")
            .is_empty());
    }

    #[tokio::test]
    async fn regression_local_gateway_second_claim_reports_already_claimed() {
        let temp = tempdir().expect("tempdir");
        let gateway = gateway(temp.path());
        std::fs::write(temp.path().join("inbox/a.txt"), "a").expect("write");
        let files = gateway.list_new_files(&HashSet::new()).await.expect("list");
        gateway.claim(&files[0]).await.expect("first claim");
        let error = gateway.claim(&files[0]).await.expect_err("second claim");
        assert!(matches!(error, RemoteError::AlreadyClaimed(name) if name == "a.txt"));
    }

    #[tokio::test]
    async fn unit_local_gateway_excludes_processed_names() {
        let temp = tempdir().expect("tempdir");
        let gateway = gateway(temp.path());
        std::fs::write(temp.path().join("inbox/a.txt"), "a").expect("write");
        std::fs::write(temp.path().join("inbox/b.txt"), "b").expect("write");
        let processed = HashSet::from(["a.txt".to_string()]);
        let files = gateway.list_new_files(&processed).await.expect("list");
        let names = files.iter().map(|file| file.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["b.txt"]);
    }

    #[tokio::test]
    async fn functional_local_gateway_failure_goes_to_error_dir_without_overwriting() {
        let temp = tempdir().expect("tempdir");
        let gateway = gateway(temp.path());
        std::fs::create_dir_all(gateway.error_dir()).expect("create error dir");
        std::fs::write(gateway.error_dir().join("bad.txt"), "older").expect("seed collision");
        std::fs::write(temp.path().join("inbox/bad.txt"), "newer").expect("write");

        let files = gateway.list_new_files(&HashSet::new()).await.expect("list");
        let claimed = gateway.claim(&files[0]).await.expect("claim");
        let finalized = gateway
            .finalize(&claimed, FinalizeOutcome::Failure)
            .await
            .expect("finalize");
        assert_ne!(
            finalized.location,
            gateway.error_dir().join("bad.txt").display().to_string()
        );
        assert!(finalized.location.contains("bad-"));
        assert_eq!(
            std::fs::read_to_string(gateway.error_dir().join("bad.txt")).expect("read older"),
            "older"
        );
        assert_eq!(
            std::fs::read_to_string(&finalized.location).expect("read newer"),
            "newer"
        );
    }

    #[tokio::test]
    async fn regression_local_gateway_missing_inbox_is_unavailable() {
        let temp = tempdir().expect("tempdir");
        let gateway = LocalFolderGateway::new(
            temp.path().join("missing-inbox"),
            temp.path().join("archive"),
            None,
            None,
        );
        let error = gateway
            .list_new_files(&HashSet::new())
            .await
            .expect_err("missing inbox");
        assert!(error.is_unavailable());
        assert!(gateway.probe().await.expect_err("probe").is_unavailable());
    }
}
