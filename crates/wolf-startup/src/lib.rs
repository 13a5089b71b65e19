//! Builds the process-wide service context once at startup.
//!
//! Every long-lived component is constructed here and handed to the
//! serving layer as `Arc`s; nothing downstream reaches for globals.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use wolf_analysis::{Analyzer, GeminiAnalyzer, GeminiAnalyzerConfig};
use wolf_config::{
    config_issues, resolve, ConfigIssue, OperationMode, RemoteBackendKind, RemoteLayout,
    ServiceConfig,
};
use wolf_health::{HealthAggregator, HealthSources};
use wolf_ingest::{IngestionConfig, IngestionScheduler, RecoverySummary};
use wolf_keys::KeyRegistry;
use wolf_remote::{
    DisabledFolderGateway, DriveFolderGateway, DriveFolderGatewayConfig, LocalFolderGateway,
    RemoteFolderGateway, ServiceAccountTokenSource,
};
use wolf_store::{PromptStore, ReportStore, SqlitePromptStore, SqliteReportStore, UnavailableStore};

const DRIVE_RETRY_MAX_ATTEMPTS: usize = 3;
const DRIVE_RETRY_BASE_DELAY_MS: u64 = 500;
const ANALYSIS_MAX_RETRIES: usize = 1;
const ANALYSIS_RETRY_BASE_DELAY_MS: u64 = 5_000;

/// Pre-built components for `assemble`.
pub struct ServiceParts {
    pub mode: OperationMode,
    pub config_issues: Vec<ConfigIssue>,
    pub ephemeral_root: Option<PathBuf>,
    pub ingestion_enabled: bool,
    pub scheduler_interval: Duration,
    pub remote_timeout: Duration,
    pub store_timeout: Duration,
    pub reports: Arc<dyn ReportStore>,
    pub prompts: Arc<dyn PromptStore>,
    pub gateway: Arc<dyn RemoteFolderGateway>,
    pub analyzer: Arc<dyn Analyzer>,
    pub keys: Arc<KeyRegistry>,
}

/// Shared components for the serving layer and the scheduler.
#[derive(Clone)]
pub struct ServiceContext {
    pub mode: OperationMode,
    pub ephemeral_root: Option<PathBuf>,
    pub reports: Arc<dyn ReportStore>,
    pub prompts: Arc<dyn PromptStore>,
    pub gateway: Arc<dyn RemoteFolderGateway>,
    pub analyzer: Arc<dyn Analyzer>,
    pub keys: Arc<KeyRegistry>,
    pub scheduler: Arc<IngestionScheduler>,
    pub health: Arc<HealthAggregator>,
}

/// Wires the scheduler and health aggregator around already-built parts.
pub fn assemble(parts: ServiceParts) -> ServiceContext {
    let scheduler = Arc::new(IngestionScheduler::new(
        parts.gateway.clone(),
        parts.reports.clone(),
        parts.analyzer.clone(),
        IngestionConfig {
            interval: parts.scheduler_interval,
            remote_timeout: parts.remote_timeout,
            store_timeout: parts.store_timeout,
            enabled: parts.ingestion_enabled,
        },
    ));
    let health = Arc::new(HealthAggregator::new(HealthSources {
        mode: parts.mode,
        reports: parts.reports.clone(),
        prompts: parts.prompts.clone(),
        gateway: parts.gateway.clone(),
        scheduler: scheduler.clone(),
        analyzer: parts.analyzer.clone(),
        keys: parts.keys.clone(),
        config_issues: parts.config_issues,
        probe_timeout: parts.remote_timeout.max(parts.store_timeout),
    }));
    ServiceContext {
        mode: parts.mode,
        ephemeral_root: parts.ephemeral_root,
        reports: parts.reports,
        prompts: parts.prompts,
        gateway: parts.gateway,
        analyzer: parts.analyzer,
        keys: parts.keys,
        scheduler,
        health,
    }
}

/// Resolves configuration and builds every component.
///
/// Missing durable settings are fatal. A store that fails to open is
/// replaced by an `UnavailableStore` so the other store keeps serving.
pub fn build_service_context(config: &ServiceConfig, keys: KeyRegistry) -> Result<ServiceContext> {
    let layout = resolve(config).context("failed to resolve service configuration")?;
    let issues = config_issues(config);
    for issue in &issues {
        tracing::info!(setting = issue.setting, message = %issue.message, "configuration note");
    }

    if let Some(root) = layout.ephemeral_root.as_ref() {
        std::fs::create_dir_all(root)
            .with_context(|| format!("failed to create ephemeral root {}", root.display()))?;
    }

    let reports: Arc<dyn ReportStore> =
        match SqliteReportStore::with_busy_timeout(&layout.report_store_path, config.store_timeout) {
            Ok(store) => Arc::new(store),
            Err(error) => {
                tracing::error!(path = %layout.report_store_path.display(), error = %error, "report store unavailable");
                Arc::new(UnavailableStore::new(
                    "reports",
                    error.to_string(),
                    Some(layout.report_store_path.clone()),
                ))
            }
        };
    let prompts: Arc<dyn PromptStore> =
        match SqlitePromptStore::with_busy_timeout(&layout.prompt_store_path, config.store_timeout) {
            Ok(store) => Arc::new(store),
            Err(error) => {
                tracing::error!(path = %layout.prompt_store_path.display(), error = %error, "prompt store unavailable");
                Arc::new(UnavailableStore::new(
                    "prompts",
                    error.to_string(),
                    Some(layout.prompt_store_path.clone()),
                ))
            }
        };

    let gateway = match layout.remote.as_ref() {
        Some(remote) => build_gateway(remote, config)?,
        None => Arc::new(DisabledFolderGateway) as Arc<dyn RemoteFolderGateway>,
    };

    let keys = Arc::new(keys);
    let analyzer = GeminiAnalyzer::new(
        GeminiAnalyzerConfig {
            api_base: config.analysis_api_base.clone(),
            model: config.analysis_model.clone(),
            request_timeout: config.analysis_timeout,
            max_retries: ANALYSIS_MAX_RETRIES,
            retry_base_delay_ms: ANALYSIS_RETRY_BASE_DELAY_MS,
        },
        keys.clone(),
    )
    .context("failed to create analysis client")?;

    tracing::info!(
        mode = layout.mode.as_str(),
        backend = gateway.backend(),
        reports = %layout.report_store_path.display(),
        prompts = %layout.prompt_store_path.display(),
        "service context assembled"
    );

    Ok(assemble(ServiceParts {
        mode: layout.mode,
        config_issues: issues,
        ingestion_enabled: layout.ingestion_enabled(),
        ephemeral_root: layout.ephemeral_root,
        scheduler_interval: layout.scheduler_interval,
        remote_timeout: config.remote_timeout,
        store_timeout: config.store_timeout,
        reports,
        prompts,
        gateway,
        analyzer: Arc::new(analyzer),
        keys,
    }))
}

fn build_gateway(
    remote: &RemoteLayout,
    config: &ServiceConfig,
) -> Result<Arc<dyn RemoteFolderGateway>> {
    match remote.backend {
        RemoteBackendKind::Filesystem => Ok(Arc::new(LocalFolderGateway::new(
            PathBuf::from(&remote.inbox),
            PathBuf::from(&remote.archive),
            remote.processing.as_ref().map(PathBuf::from),
            remote.error.as_ref().map(PathBuf::from),
        ))),
        RemoteBackendKind::Drive => {
            let credential = remote
                .credential
                .as_ref()
                .context("drive backend requires a service account credential")?;
            let tokens = ServiceAccountTokenSource::new(credential, config.remote_timeout)?;
            let gateway = DriveFolderGateway::new(
                DriveFolderGatewayConfig {
                    api_base: config.drive_api_base.clone(),
                    inbox_folder_id: remote.inbox.clone(),
                    archive_folder_id: remote.archive.clone(),
                    processing_folder_id: remote.processing.clone(),
                    error_folder_id: remote.error.clone(),
                    request_timeout: config.remote_timeout,
                    retry_max_attempts: DRIVE_RETRY_MAX_ATTEMPTS,
                    retry_base_delay_ms: DRIVE_RETRY_BASE_DELAY_MS,
                },
                Arc::new(tokens),
            )?;
            Ok(Arc::new(gateway))
        }
    }
}

impl ServiceContext {
    /// Settles files a previous process left in the in-progress location.
    /// Failures are logged and retried by later passes.
    pub async fn recover_at_startup(&self) -> Option<RecoverySummary> {
        match self.scheduler.recover_stranded().await {
            Ok(summary) => Some(summary),
            Err(error) => {
                tracing::warn!(error = %error, "startup recovery skipped");
                None
            }
        }
    }

    /// Removes the per-process directory used in ephemeral mode.
    pub fn cleanup_ephemeral_root(&self) -> Result<()> {
        match self.ephemeral_root.as_deref() {
            Some(root) => remove_dir_if_present(root),
            None => Ok(()),
        }
    }
}

fn remove_dir_if_present(root: &Path) -> Result<()> {
    match std::fs::remove_dir_all(root) {
        Ok(()) => {
            tracing::info!(path = %root.display(), "removed ephemeral storage");
            Ok(())
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error)
            .with_context(|| format!("failed to remove ephemeral root {}", root.display())),
    }
}
