use std::collections::HashSet;

use async_trait::async_trait;

use crate::{
    ClaimedFile, FinalizeOutcome, FinalizedFile, RemoteError, RemoteFile, RemoteFolderGateway,
    RemoteResult,
};

/// Gateway used when no remote storage is configured.
///
/// Listings are empty and every mutating call fails with `RemoteError::Disabled`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledFolderGateway;

#[async_trait]
impl RemoteFolderGateway for DisabledFolderGateway {
    fn backend(&self) -> &'static str {
        "disabled"
    }

    fn destination(&self, _outcome: FinalizeOutcome) -> String {
        String::new()
    }

    async fn list_new_files(&self, _processed: &HashSet<String>) -> RemoteResult<Vec<RemoteFile>> {
        Ok(Vec::new())
    }

    async fn claim(&self, _file: &RemoteFile) -> RemoteResult<ClaimedFile> {
        Err(RemoteError::Disabled)
    }

    async fn read(&self, _claimed: &ClaimedFile) -> RemoteResult<Vec<u8>> {
        Err(RemoteError::Disabled)
    }

    async fn finalize(
        &self,
        _claimed: &ClaimedFile,
        _outcome: FinalizeOutcome,
    ) -> RemoteResult<FinalizedFile> {
        Err(RemoteError::Disabled)
    }

    async fn list_in_progress(&self) -> RemoteResult<Vec<ClaimedFile>> {
        Ok(Vec::new())
    }

    async fn probe(&self) -> RemoteResult<()> {
        Err(RemoteError::Disabled)
    }
}
