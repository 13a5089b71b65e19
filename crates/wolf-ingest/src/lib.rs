//! Scheduled ingestion of report files from remote storage.
//!
//! A pass lists the inbox, claims each new file, analyzes it, persists the
//! outcome, records the filename guard, and relocates the file. One pass
//! runs at a time; the recurring loop lives in [`runtime`].

use thiserror::Error;
use wolf_remote::RemoteError;
use wolf_store::StoreError;

pub mod runtime;
mod scheduler;
mod status;

#[cfg(test)]
mod test_support;

pub use runtime::{start_ingestion_scheduler, IngestionSchedulerHandle};
pub use scheduler::{IngestionConfig, IngestionScheduler, RecoverySummary};
pub use status::{PassOutcome, PassPhase, PassSummary, SchedulerStatus};

/// Message stored on reports whose processing was cut short by a restart.
pub const INTERRUPTED_REASON: &str = "interrupted before completion";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
