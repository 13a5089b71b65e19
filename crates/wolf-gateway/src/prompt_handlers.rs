//! Prompt template and conversation routes backed by the prompt store.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use wolf_startup::ServiceContext;
use wolf_store::{PromptRecord, StoreError};

use crate::api_error::ApiError;
use crate::endpoints::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};

const DEFAULT_CONVERSATION_ROLE: &str = "user";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TemplateListParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TemplateWriteRequest {
    content: String,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConversationTurnRequest {
    #[serde(default)]
    role: Option<String>,
    content: String,
}

pub(crate) async fn handle_templates_list(
    State(context): State<Arc<ServiceContext>>,
    Query(params): Query<TemplateListParams>,
) -> Result<Response, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let offset = params.offset.unwrap_or(0);
    let templates = context.prompts.list_templates(limit, offset).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "limit": limit,
            "offset": offset,
            "templates": templates,
        })),
    )
        .into_response())
}

pub(crate) async fn handle_template_get(
    State(context): State<Arc<ServiceContext>>,
    AxumPath(name): AxumPath<String>,
) -> Result<Response, ApiError> {
    let template = context
        .prompts
        .get_template(name.trim())
        .await
        .map_err(|error| match error {
            StoreError::NotFound(_) => ApiError::not_found(
                "template_not_found",
                format!("template '{}' was not found", name.trim()),
            ),
            other => ApiError::from(other),
        })?;
    Ok((StatusCode::OK, Json(template)).into_response())
}

pub(crate) async fn handle_template_put(
    State(context): State<Arc<ServiceContext>>,
    AxumPath(name): AxumPath<String>,
    Json(request): Json<TemplateWriteRequest>,
) -> Result<Response, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::unprocessable(
            "invalid_template_name",
            "template name must be non-empty",
        ));
    }
    if request.content.trim().is_empty() {
        return Err(ApiError::unprocessable(
            "invalid_template_content",
            "template content must be non-empty",
        ));
    }
    let category = request
        .category
        .map(|category| category.trim().to_string())
        .filter(|category| !category.is_empty());
    let stored = context
        .prompts
        .put_prompt(PromptRecord::template(name, request.content, category))
        .await?;
    Ok((StatusCode::OK, Json(stored)).into_response())
}

pub(crate) async fn handle_conversation_list(
    State(context): State<Arc<ServiceContext>>,
    AxumPath(session_id): AxumPath<String>,
) -> Result<Response, ApiError> {
    let session_id = session_id.trim();
    let turns = context.prompts.list_conversation(session_id).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "session_id": session_id,
            "turns": turns,
        })),
    )
        .into_response())
}

pub(crate) async fn handle_conversation_append(
    State(context): State<Arc<ServiceContext>>,
    AxumPath(session_id): AxumPath<String>,
    Json(request): Json<ConversationTurnRequest>,
) -> Result<Response, ApiError> {
    let session_id = session_id.trim();
    if session_id.is_empty() {
        return Err(ApiError::unprocessable(
            "invalid_session_id",
            "session_id must be non-empty",
        ));
    }
    if request.content.trim().is_empty() {
        return Err(ApiError::unprocessable(
            "invalid_turn_content",
            "turn content must be non-empty",
        ));
    }
    let role = request
        .role
        .map(|role| role.trim().to_string())
        .filter(|role| !role.is_empty())
        .unwrap_or_else(|| DEFAULT_CONVERSATION_ROLE.to_string());
    let stored = context
        .prompts
        .put_prompt(PromptRecord::conversation_turn(session_id, role, request.content))
        .await?;
    Ok((StatusCode::CREATED, Json(stored)).into_response())
}
