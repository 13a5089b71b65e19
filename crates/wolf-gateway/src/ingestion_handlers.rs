use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use wolf_ingest::PassOutcome;
use wolf_startup::ServiceContext;

use crate::api_error::ApiError;

/// Runs one ingestion pass now and returns its summary.
///
/// The pass runs on its own task, so a client that disconnects does not
/// cancel it. A pass already in progress answers 409; a pass cut short by an
/// unavailable dependency answers 503. The body is the summary either way.
pub(crate) async fn handle_ingestion_run(State(context): State<Arc<ServiceContext>>) -> Response {
    let scheduler = context.scheduler.clone();
    let summary = match tokio::spawn(async move { scheduler.trigger_pass().await }).await {
        Ok(summary) => summary,
        Err(error) => {
            tracing::error!(error = %error, "manual ingestion pass task failed");
            return ApiError::internal("ingestion pass failed to complete").into_response();
        }
    };
    let status = match summary.outcome {
        PassOutcome::Completed => StatusCode::OK,
        PassOutcome::Skipped | PassOutcome::Disabled => StatusCode::CONFLICT,
        PassOutcome::RemoteUnavailable | PassOutcome::StoreUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    (status, Json(summary)).into_response()
}
