use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::{ConfigurationError, OperationMode, RemoteBackendKind};

pub(crate) const DEFAULT_SCHEDULER_INTERVAL_MINUTES: u64 = 15;
pub(crate) const DEFAULT_GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Typed configuration assembled once at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub mode: OperationMode,
    pub remote_backend: RemoteBackendKind,
    /// Raw service-account JSON payload for the Drive backend.
    pub service_account_json: Option<String>,
    pub inbox_folder: Option<String>,
    pub archive_folder: Option<String>,
    pub processing_folder: Option<String>,
    pub error_folder: Option<String>,
    pub data_dir: PathBuf,
    pub reports_db_path: Option<PathBuf>,
    pub prompts_db_path: Option<PathBuf>,
    /// Overrides the per-process directory used in ephemeral mode.
    pub ephemeral_root: Option<PathBuf>,
    pub scheduler_interval: Duration,
    pub remote_timeout: Duration,
    pub store_timeout: Duration,
    pub drive_api_base: String,
    pub analysis_api_base: String,
    pub analysis_model: String,
    pub analysis_timeout: Duration,
    pub bind: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Ephemeral,
            remote_backend: RemoteBackendKind::Drive,
            service_account_json: None,
            inbox_folder: None,
            archive_folder: None,
            processing_folder: None,
            error_folder: None,
            data_dir: PathBuf::from("data"),
            reports_db_path: None,
            prompts_db_path: None,
            ephemeral_root: None,
            scheduler_interval: Duration::from_secs(DEFAULT_SCHEDULER_INTERVAL_MINUTES * 60),
            remote_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(5),
            drive_api_base: "https://www.googleapis.com/drive/v3".to_string(),
            analysis_api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            analysis_model: "gemini-1.5-flash".to_string(),
            analysis_timeout: Duration::from_secs(120),
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Google service-account key material needed to mint Drive access tokens.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceAccountCredential {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_GOOGLE_TOKEN_URI.to_string()
}

impl ServiceAccountCredential {
    /// Parses the JSON payload of a downloaded service-account key.
    pub fn from_json(raw: &str) -> Result<Self, ConfigurationError> {
        let credential = serde_json::from_str::<Self>(raw)
            .map_err(|error| ConfigurationError::InvalidCredential(error.to_string()))?;
        if credential.client_email.trim().is_empty() {
            return Err(ConfigurationError::InvalidCredential(
                "client_email must not be empty".to_string(),
            ));
        }
        if !credential.private_key.contains("PRIVATE KEY") {
            return Err(ConfigurationError::InvalidCredential(
                "private_key is not a PEM encoded key".to_string(),
            ));
        }
        Ok(credential)
    }
}

impl fmt::Debug for ServiceAccountCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountCredential")
            .field("client_email", &self.client_email)
            .field("private_key", &"[REDACTED]")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}
