//! Operating-mode resolution and typed service configuration for Wolf.
//!
//! `ServiceConfig` is the only configuration shape downstream crates accept;
//! `resolve` turns it into a `ResolvedLayout` naming every storage location
//! and remote folder the process will touch.

mod mode;
mod resolver;
mod service_config;

use thiserror::Error;

pub use mode::{OperationMode, RemoteBackendKind};
pub use resolver::{
    config_issues, render_config_status, resolve, ConfigIssue, ConfigIssueSeverity,
    RemoteLayout, ResolvedLayout,
};
pub use service_config::{ServiceAccountCredential, ServiceConfig};

/// Errors raised while resolving configuration at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("durable mode requires settings that are missing: {}", missing.join(", "))]
    MissingDurableSettings { missing: Vec<&'static str> },
    #[error("invalid service account credential: {0}")]
    InvalidCredential(String),
    #[error("invalid value for '{setting}': {value}")]
    InvalidValue { setting: &'static str, value: String },
}
