use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::{
    ConfigurationError, OperationMode, RemoteBackendKind, ServiceAccountCredential, ServiceConfig,
};

const REPORTS_DB_FILE: &str = "reports.sqlite";
const PROMPTS_DB_FILE: &str = "prompts.sqlite";
const SETTING_CREDENTIAL: &str = "GOOGLE_SERVICE_ACCOUNT_JSON_CONTENT";
const SETTING_INBOX: &str = "WOLF_IN_FOLDER_ID";
const SETTING_ARCHIVE: &str = "WOLF_PROCESSED_FOLDER_ID";

/// Remote folder wiring for durable mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    pub backend: RemoteBackendKind,
    pub inbox: String,
    pub archive: String,
    pub processing: Option<String>,
    pub error: Option<String>,
    pub credential: Option<ServiceAccountCredential>,
}

/// Concrete locations derived from `ServiceConfig` for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLayout {
    pub mode: OperationMode,
    pub report_store_path: PathBuf,
    pub prompt_store_path: PathBuf,
    pub inbox_folder_ref: Option<String>,
    pub archive_folder_ref: Option<String>,
    pub remote: Option<RemoteLayout>,
    /// Directory holding ephemeral stores; removed at shutdown.
    pub ephemeral_root: Option<PathBuf>,
    pub scheduler_interval: Duration,
}

impl ResolvedLayout {
    /// True when a scheduler has somewhere to poll.
    pub fn ingestion_enabled(&self) -> bool {
        self.mode.is_durable() && self.inbox_folder_ref.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigIssueSeverity {
    /// Not required in the active mode.
    Info,
    /// Required in the active mode and absent.
    Missing,
    /// Present but unusable.
    Invalid,
}

/// One configuration finding surfaced through `config_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    pub setting: &'static str,
    pub severity: ConfigIssueSeverity,
    pub message: String,
}

/// Resolves mode-specific storage paths and folder references.
///
/// Computes paths only; nothing is created on disk.
pub fn resolve(config: &ServiceConfig) -> Result<ResolvedLayout, ConfigurationError> {
    match config.mode {
        OperationMode::Ephemeral => {
            let root = ephemeral_root(config);
            Ok(ResolvedLayout {
                mode: OperationMode::Ephemeral,
                report_store_path: root.join(REPORTS_DB_FILE),
                prompt_store_path: root.join(PROMPTS_DB_FILE),
                inbox_folder_ref: None,
                archive_folder_ref: None,
                remote: None,
                ephemeral_root: Some(root),
                scheduler_interval: config.scheduler_interval,
            })
        }
        OperationMode::Durable => {
            let missing = missing_durable_settings(config);
            if !missing.is_empty() {
                return Err(ConfigurationError::MissingDurableSettings { missing });
            }
            let (Some(inbox), Some(archive)) = (
                present(&config.inbox_folder),
                present(&config.archive_folder),
            ) else {
                return Err(ConfigurationError::MissingDurableSettings {
                    missing: vec![SETTING_INBOX, SETTING_ARCHIVE],
                });
            };
            let credential = match (config.remote_backend, present(&config.service_account_json)) {
                (RemoteBackendKind::Drive, Some(raw)) => {
                    Some(ServiceAccountCredential::from_json(raw)?)
                }
                _ => None,
            };
            let remote = RemoteLayout {
                backend: config.remote_backend,
                inbox: inbox.to_string(),
                archive: archive.to_string(),
                processing: present(&config.processing_folder).map(str::to_string),
                error: present(&config.error_folder).map(str::to_string),
                credential,
            };
            Ok(ResolvedLayout {
                mode: OperationMode::Durable,
                report_store_path: durable_store_path(
                    config.reports_db_path.as_deref(),
                    &config.data_dir,
                    REPORTS_DB_FILE,
                ),
                prompt_store_path: durable_store_path(
                    config.prompts_db_path.as_deref(),
                    &config.data_dir,
                    PROMPTS_DB_FILE,
                ),
                inbox_folder_ref: Some(remote.inbox.clone()),
                archive_folder_ref: Some(remote.archive.clone()),
                remote: Some(remote),
                ephemeral_root: None,
                scheduler_interval: config.scheduler_interval,
            })
        }
    }
}

/// Reports configuration gaps without failing, for health reporting.
pub fn config_issues(config: &ServiceConfig) -> Vec<ConfigIssue> {
    let durable = config.mode.is_durable();
    let severity = if durable {
        ConfigIssueSeverity::Missing
    } else {
        ConfigIssueSeverity::Info
    };
    let mut issues = missing_durable_settings(config)
        .into_iter()
        .map(|setting| ConfigIssue {
            setting,
            severity,
            message: format!("{setting} is not set"),
        })
        .collect::<Vec<_>>();

    if config.remote_backend == RemoteBackendKind::Drive {
        if let Some(raw) = present(&config.service_account_json) {
            if let Err(error) = ServiceAccountCredential::from_json(raw) {
                issues.push(ConfigIssue {
                    setting: SETTING_CREDENTIAL,
                    severity: if durable {
                        ConfigIssueSeverity::Invalid
                    } else {
                        ConfigIssueSeverity::Info
                    },
                    message: error.to_string(),
                });
            }
        }
    }
    issues
}

/// Renders the `config_status` string shown by the health endpoints.
pub fn render_config_status(mode: OperationMode, issues: &[ConfigIssue]) -> String {
    let blocking = issues
        .iter()
        .filter(|issue| issue.severity != ConfigIssueSeverity::Info)
        .map(|issue| issue.message.as_str())
        .collect::<Vec<_>>();
    if !blocking.is_empty() {
        return format!("configuration incomplete: {}", blocking.join("; "));
    }
    if mode == OperationMode::Ephemeral {
        return "ephemeral mode: remote storage settings not required".to_string();
    }
    "all required settings present".to_string()
}

fn missing_durable_settings(config: &ServiceConfig) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if config.remote_backend == RemoteBackendKind::Drive
        && present(&config.service_account_json).is_none()
    {
        missing.push(SETTING_CREDENTIAL);
    }
    if present(&config.inbox_folder).is_none() {
        missing.push(SETTING_INBOX);
    }
    if present(&config.archive_folder).is_none() {
        missing.push(SETTING_ARCHIVE);
    }
    missing
}

fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn ephemeral_root(config: &ServiceConfig) -> PathBuf {
    config.ephemeral_root.clone().unwrap_or_else(|| {
        std::env::temp_dir().join(format!("wolf-ephemeral-{}", std::process::id()))
    })
}

fn durable_store_path(explicit: Option<&Path>, data_dir: &Path, file_name: &str) -> PathBuf {
    match explicit {
        Some(path) if !path.as_os_str().is_empty() => path.to_path_buf(),
        _ => data_dir.join(file_name),
    }
}
