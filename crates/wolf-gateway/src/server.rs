//! Router wiring and serve loop.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use wolf_startup::ServiceContext;

use crate::endpoints::*;
use crate::health_handlers::{
    handle_health, handle_health_verbose, handle_key_status, handle_set_keys,
};
use crate::ingestion_handlers::handle_ingestion_run;
use crate::prompt_handlers::{
    handle_conversation_append, handle_conversation_list, handle_template_get,
    handle_template_put, handle_templates_list,
};
use crate::report_handlers::{handle_report_detail, handle_report_requeue, handle_reports_list};

fn service_routes() -> Router<Arc<ServiceContext>> {
    Router::new()
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(HEALTH_VERBOSE_ENDPOINT, get(handle_health_verbose))
        .route(KEY_STATUS_ENDPOINT, get(handle_key_status))
        .route(SET_KEYS_ENDPOINT, post(handle_set_keys))
        .route(REPORTS_ENDPOINT, get(handle_reports_list))
        .route(REPORT_DETAIL_ENDPOINT, get(handle_report_detail))
        .route(REPORT_REQUEUE_ENDPOINT, post(handle_report_requeue))
        .route(PROMPT_TEMPLATES_ENDPOINT, get(handle_templates_list))
        .route(
            PROMPT_TEMPLATE_DETAIL_ENDPOINT,
            get(handle_template_get).put(handle_template_put),
        )
        .route(
            PROMPT_CONVERSATION_ENDPOINT,
            get(handle_conversation_list).post(handle_conversation_append),
        )
        .route(INGESTION_RUN_ENDPOINT, post(handle_ingestion_run))
}

/// Builds the HTTP router over a shared service context.
pub fn build_router(context: Arc<ServiceContext>) -> Router {
    Router::new()
        .merge(service_routes())
        .nest(API_V1_PREFIX, service_routes())
        .with_state(context)
}

/// Serves until `shutdown` resolves.
pub async fn serve_gateway<F>(
    listener: TcpListener,
    context: Arc<ServiceContext>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway address")?;
    tracing::info!(addr = %local_addr, mode = context.mode.as_str(), "gateway listening");
    axum::serve(listener, build_router(context))
        .with_graceful_shutdown(shutdown)
        .await
        .context("gateway server exited unexpectedly")
}
