//! `/health`, `/health/verbose`, and the key status routes.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use wolf_health::{ComponentHealth, HealthSnapshot, KeysHealth, SchedulerHealth};
use wolf_keys::KeyUpdate;
use wolf_startup::ServiceContext;

use crate::api_error::ApiError;

#[derive(Debug, Serialize)]
struct VerboseHealthView<'a> {
    overall_status: &'static str,
    status: &'static str,
    timestamp: DateTime<Utc>,
    mode: &'static str,
    report_store_status: &'a ComponentHealth,
    prompt_store_status: &'a ComponentHealth,
    remote_storage_status: Option<&'a ComponentHealth>,
    scheduler_status: &'a SchedulerHealth,
    config_status: &'a ComponentHealth,
    analysis_service_status: &'a ComponentHealth,
    key_status: &'a KeysHealth,
}

impl<'a> VerboseHealthView<'a> {
    fn from_snapshot(snapshot: &'a HealthSnapshot) -> Self {
        Self {
            overall_status: snapshot.overall_label,
            status: snapshot.overall.as_str(),
            timestamp: snapshot.generated_at,
            mode: snapshot.mode.as_str(),
            report_store_status: &snapshot.report_store,
            prompt_store_status: &snapshot.prompt_store,
            remote_storage_status: snapshot.remote_storage.as_ref(),
            scheduler_status: &snapshot.scheduler,
            config_status: &snapshot.configuration,
            analysis_service_status: &snapshot.analysis_service,
            key_status: &snapshot.keys,
        }
    }
}

pub(crate) async fn handle_health(State(context): State<Arc<ServiceContext>>) -> Response {
    match context.health.snapshot(false).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot.compact())).into_response(),
        Err(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(error.snapshot().compact()),
        )
            .into_response(),
    }
}

pub(crate) async fn handle_health_verbose(
    State(context): State<Arc<ServiceContext>>,
) -> Response {
    match context.health.snapshot(true).await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(VerboseHealthView::from_snapshot(&snapshot)),
        )
            .into_response(),
        Err(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(VerboseHealthView::from_snapshot(error.snapshot())),
        )
            .into_response(),
    }
}

pub(crate) async fn handle_key_status(
    State(context): State<Arc<ServiceContext>>,
) -> Json<BTreeMap<&'static str, &'static str>> {
    Json(context.keys.status_labels())
}

/// Accepts `{KEY_NAME: "value" | null}`. Strings set, `null` clears.
pub(crate) async fn handle_set_keys(
    State(context): State<Arc<ServiceContext>>,
    Json(payload): Json<Map<String, Value>>,
) -> Response {
    let mut updates = Vec::with_capacity(payload.len());
    for (name, value) in payload {
        let update = match value {
            Value::String(value) => KeyUpdate::Set(value),
            Value::Null => KeyUpdate::Clear,
            other => {
                return ApiError::unprocessable(
                    "invalid_key_value",
                    format!("value for '{name}' must be a string or null, got {other}"),
                )
                .into_response();
            }
        };
        updates.push((name, update));
    }

    let updated = match context.keys.apply(updates) {
        Ok(updated) => updated,
        Err(error) => return ApiError::from(error).into_response(),
    };
    let updated_keys = updated
        .iter()
        .map(|name| name.as_str())
        .collect::<Vec<_>>();
    let message = if updated_keys.is_empty() {
        "no keys were provided".to_string()
    } else {
        format!("keys updated: {}", updated_keys.join(", "))
    };
    (
        StatusCode::OK,
        Json(json!({
            "message": message,
            "updated_keys": updated_keys,
            "key_status": context.keys.status_labels(),
        })),
    )
        .into_response()
}
