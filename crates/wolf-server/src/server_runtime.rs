//! Process lifecycle: recover, start the scheduler, serve, then wind down.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use wolf_gateway::serve_gateway;
use wolf_ingest::start_ingestion_scheduler;
use wolf_startup::ServiceContext;

/// Runs the service on `listener` until `shutdown` resolves.
///
/// The scheduler is stopped after the HTTP server drains, so an in-flight
/// pass finishes finalizing its claimed files before the process exits.
pub(crate) async fn run_service<F>(
    context: Arc<ServiceContext>,
    listener: TcpListener,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Some(summary) = context.recover_at_startup().await {
        if summary.resumed > 0 || summary.failed > 0 {
            tracing::info!(
                resumed = summary.resumed,
                failed = summary.failed,
                "recovered stranded files"
            );
        }
    }

    let mut scheduler = start_ingestion_scheduler(Arc::clone(&context.scheduler))?;

    let serve_result = serve_gateway(listener, Arc::clone(&context), shutdown).await;
    scheduler.shutdown().await;
    if let Err(error) = context.cleanup_ephemeral_root() {
        tracing::warn!(error = %error, "ephemeral storage cleanup failed");
    }
    serve_result
}
