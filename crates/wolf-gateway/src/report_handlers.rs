use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use wolf_startup::ServiceContext;
use wolf_store::{ReportQuery, ReportStatus};

use crate::api_error::ApiError;
use crate::endpoints::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReportListParams {
    status: Option<String>,
    source_filename: Option<String>,
    limit: Option<usize>,
}

pub(crate) async fn handle_reports_list(
    State(context): State<Arc<ServiceContext>>,
    Query(params): Query<ReportListParams>,
) -> Result<Response, ApiError> {
    let statuses = match params.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(vec![ReportStatus::from_str(raw).map_err(|_| {
            ApiError::unprocessable(
                "invalid_status",
                format!("status must be pending, processed, or failed, got '{raw}'"),
            )
        })?]),
    };
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let reports = context
        .reports
        .list_by_status(ReportQuery {
            statuses,
            source_filename: params.source_filename,
            limit: Some(limit),
        })
        .await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "total": reports.len(),
            "reports": reports,
        })),
    )
        .into_response())
}

pub(crate) async fn handle_report_detail(
    State(context): State<Arc<ServiceContext>>,
    AxumPath(report_id): AxumPath<String>,
) -> Result<Response, ApiError> {
    let report = context.reports.get_report(report_id.trim()).await?;
    Ok((StatusCode::OK, Json(report)).into_response())
}

pub(crate) async fn handle_report_requeue(
    State(context): State<Arc<ServiceContext>>,
    AxumPath(report_id): AxumPath<String>,
) -> Result<Response, ApiError> {
    let report = context.reports.requeue_report(report_id.trim()).await?;
    Ok((StatusCode::OK, Json(report)).into_response())
}
