use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use wolf_config::{ConfigurationError, OperationMode, RemoteBackendKind, ServiceConfig};
use wolf_core::normalize_env_value;
use wolf_keys::KeyName;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let normalized = normalize_env_value(value).ok_or_else(|| "value is empty".to_string())?;
    let parsed = normalized
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.as_deref().and_then(normalize_env_value)
}

fn normalize_optional_path(value: Option<PathBuf>) -> Option<PathBuf> {
    value
        .as_ref()
        .and_then(|path| path.to_str())
        .and_then(normalize_env_value)
        .map(PathBuf::from)
}

#[derive(Debug, Parser)]
#[command(
    name = "wolf-server",
    about = "Report ingestion service with durable and ephemeral storage modes",
    version
)]
pub struct Cli {
    #[arg(
        long = "operation-mode",
        env = "OPERATION_MODE",
        default_value = "ephemeral",
        help = "Storage mode: ephemeral (session-local, discarded at exit) or durable (remote-backed)"
    )]
    pub operation_mode: String,

    #[arg(
        long = "remote-backend",
        env = "WOLF_REMOTE_BACKEND",
        default_value = "drive",
        help = "Remote folder backend used in durable mode: drive or filesystem"
    )]
    pub remote_backend: String,

    #[arg(
        long = "service-account-json",
        env = "GOOGLE_SERVICE_ACCOUNT_JSON_CONTENT",
        hide_env_values = true,
        help = "Service-account key JSON for the drive backend"
    )]
    pub service_account_json: Option<String>,

    #[arg(
        long = "inbox-folder",
        env = "WOLF_IN_FOLDER_ID",
        help = "Inbox folder id (drive) or directory (filesystem)"
    )]
    pub inbox_folder: Option<String>,

    #[arg(
        long = "archive-folder",
        env = "WOLF_PROCESSED_FOLDER_ID",
        help = "Archive folder id (drive) or directory (filesystem)"
    )]
    pub archive_folder: Option<String>,

    #[arg(
        long = "processing-folder",
        env = "WOLF_PROCESSING_FOLDER_ID",
        help = "Optional in-progress folder; defaults to a child of the archive (drive) or inbox (filesystem)"
    )]
    pub processing_folder: Option<String>,

    #[arg(
        long = "error-folder",
        env = "WOLF_ERROR_FOLDER_ID",
        help = "Optional error folder; defaults to an _error child of the archive"
    )]
    pub error_folder: Option<String>,

    #[arg(
        long = "data-dir",
        env = "WOLF_DATA_DIR",
        default_value = "data",
        help = "Directory holding the durable store files when explicit paths are not given"
    )]
    pub data_dir: PathBuf,

    #[arg(long = "reports-db-path", env = "REPORTS_DB_PATH")]
    pub reports_db_path: Option<PathBuf>,

    #[arg(long = "prompts-db-path", env = "PROMPTS_DB_PATH")]
    pub prompts_db_path: Option<PathBuf>,

    #[arg(
        long = "ephemeral-root",
        env = "WOLF_EPHEMERAL_ROOT",
        help = "Overrides the per-process directory used in ephemeral mode"
    )]
    pub ephemeral_root: Option<PathBuf>,

    #[arg(
        long = "scheduler-interval-minutes",
        env = "SCHEDULER_INTERVAL_MINUTES",
        default_value_t = 15,
        value_parser = parse_positive_u64,
        help = "Minutes between ingestion passes"
    )]
    pub scheduler_interval_minutes: u64,

    #[arg(
        long = "remote-timeout-seconds",
        env = "WOLF_REMOTE_TIMEOUT_SECONDS",
        default_value_t = 30,
        value_parser = parse_positive_u64
    )]
    pub remote_timeout_seconds: u64,

    #[arg(
        long = "store-timeout-seconds",
        env = "WOLF_STORE_TIMEOUT_SECONDS",
        default_value_t = 5,
        value_parser = parse_positive_u64
    )]
    pub store_timeout_seconds: u64,

    #[arg(
        long = "drive-api-base",
        env = "WOLF_DRIVE_API_BASE",
        default_value = "https://www.googleapis.com/drive/v3"
    )]
    pub drive_api_base: String,

    #[arg(
        long = "analysis-api-base",
        env = "WOLF_ANALYSIS_API_BASE",
        default_value = "https://generativelanguage.googleapis.com/v1beta",
        help = "Base URL for the Gemini generateContent API"
    )]
    pub analysis_api_base: String,

    #[arg(
        long = "analysis-model",
        env = "WOLF_ANALYSIS_MODEL",
        default_value = "gemini-1.5-flash"
    )]
    pub analysis_model: String,

    #[arg(
        long = "analysis-timeout-seconds",
        env = "WOLF_ANALYSIS_TIMEOUT_SECONDS",
        default_value_t = 120,
        value_parser = parse_positive_u64
    )]
    pub analysis_timeout_seconds: u64,

    #[arg(long, env = "WOLF_BIND", default_value = "0.0.0.0:8000")]
    pub bind: String,

    #[arg(long = "google-api-key", env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    #[arg(long = "api-key-fred", env = "API_KEY_FRED", hide_env_values = true)]
    pub api_key_fred: Option<String>,

    #[arg(long = "api-key-finmind", env = "API_KEY_FINMIND", hide_env_values = true)]
    pub api_key_finmind: Option<String>,

    #[arg(long = "api-key-finnhub", env = "API_KEY_FINNHUB", hide_env_values = true)]
    pub api_key_finnhub: Option<String>,

    #[arg(long = "api-key-fmp", env = "API_KEY_FMP", hide_env_values = true)]
    pub api_key_fmp: Option<String>,

    #[arg(
        long = "alpha-vantage-api-key",
        env = "ALPHA_VANTAGE_API_KEY",
        hide_env_values = true
    )]
    pub alpha_vantage_api_key: Option<String>,

    #[arg(long = "deepseek-api-key", env = "DEEPSEEK_API_KEY", hide_env_values = true)]
    pub deepseek_api_key: Option<String>,
}

impl Cli {
    /// Builds the typed configuration, stripping quotes from every value.
    pub fn into_service_config(&self) -> Result<ServiceConfig, ConfigurationError> {
        let mode = normalize_env_value(&self.operation_mode)
            .unwrap_or_default()
            .parse::<OperationMode>()?;
        let remote_backend = normalize_env_value(&self.remote_backend)
            .unwrap_or_default()
            .parse::<RemoteBackendKind>()?;
        let defaults = ServiceConfig::default();
        Ok(ServiceConfig {
            mode,
            remote_backend,
            service_account_json: normalize_optional(self.service_account_json.clone()),
            inbox_folder: normalize_optional(self.inbox_folder.clone()),
            archive_folder: normalize_optional(self.archive_folder.clone()),
            processing_folder: normalize_optional(self.processing_folder.clone()),
            error_folder: normalize_optional(self.error_folder.clone()),
            data_dir: normalize_optional_path(Some(self.data_dir.clone()))
                .unwrap_or(defaults.data_dir),
            reports_db_path: normalize_optional_path(self.reports_db_path.clone()),
            prompts_db_path: normalize_optional_path(self.prompts_db_path.clone()),
            ephemeral_root: normalize_optional_path(self.ephemeral_root.clone()),
            scheduler_interval: Duration::from_secs(self.scheduler_interval_minutes.saturating_mul(60)),
            remote_timeout: Duration::from_secs(self.remote_timeout_seconds),
            store_timeout: Duration::from_secs(self.store_timeout_seconds),
            drive_api_base: normalize_env_value(&self.drive_api_base)
                .unwrap_or(defaults.drive_api_base),
            analysis_api_base: normalize_env_value(&self.analysis_api_base)
                .unwrap_or(defaults.analysis_api_base),
            analysis_model: normalize_env_value(&self.analysis_model)
                .unwrap_or(defaults.analysis_model),
            analysis_timeout: Duration::from_secs(self.analysis_timeout_seconds),
            bind: normalize_env_value(&self.bind).unwrap_or(defaults.bind),
        })
    }

    /// Key values captured at startup; blank values are dropped by the registry.
    pub fn key_seed(&self) -> Vec<(KeyName, String)> {
        [
            (KeyName::GoogleApiKey, &self.google_api_key),
            (KeyName::ApiKeyFred, &self.api_key_fred),
            (KeyName::ApiKeyFinmind, &self.api_key_finmind),
            (KeyName::ApiKeyFinnhub, &self.api_key_finnhub),
            (KeyName::ApiKeyFmp, &self.api_key_fmp),
            (KeyName::AlphaVantageApiKey, &self.alpha_vantage_api_key),
            (KeyName::DeepseekApiKey, &self.deepseek_api_key),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.clone().map(|value| (name, value)))
        .collect()
    }
}
