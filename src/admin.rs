//! Admin API: login, password rotation, rule/command/log management.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::admin_auth::{create_access_token, hash_password, verify_password};
use crate::commands::CommandError;
use crate::errors::{ApiError, ApiResult};
use crate::models::{CommandResponse, RequestLogResponse, RuleResponse};
use crate::rules::RuleError;
use crate::state::AppState;

impl From<RuleError> for ApiError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::InvalidAction(_) => ApiError::bad_request("invalid_action", err.to_string()),
            RuleError::MissingCustomResponse => {
                ApiError::bad_request("missing_custom_response", err.to_string())
            }
            RuleError::NotFound => ApiError::NotFound { code: "rule_not_found" },
            RuleError::Db(e) => ApiError::internal(e),
        }
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::NotFound => ApiError::NotFound { code: "command_not_found" },
            CommandError::NotVerified => ApiError::bad_request("command_not_verified", err.to_string()),
            CommandError::Db(e) => ApiError::internal(e),
        }
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let hash: Option<String> =
        sqlx::query_scalar("SELECT value FROM config WHERE key = 'admin_password_hash'")
            .fetch_optional(&state.pool)
            .await?;
    let hash = hash.ok_or_else(|| ApiError::internal("authentication not configured"))?;

    if !verify_password(&req.password, &hash) {
        return Err(ApiError::Unauthorized);
    }

    let token = create_access_token(&state.config.jwt_secret).map_err(ApiError::internal)?;
    Ok(Json(LoginResponse { token }))
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let hash: Option<String> =
        sqlx::query_scalar("SELECT value FROM config WHERE key = 'admin_password_hash'")
            .fetch_optional(&state.pool)
            .await?;
    let hash = hash.ok_or_else(|| ApiError::internal("authentication not configured"))?;

    if !verify_password(&req.old_password, &hash) {
        return Err(ApiError::Unauthorized);
    }

    let new_hash = hash_password(&req.new_password).map_err(ApiError::internal)?;
    sqlx::query("UPDATE config SET value = ?, updated_at = CURRENT_TIMESTAMP WHERE key = 'admin_password_hash'")
        .bind(new_hash)
        .execute(&state.pool)
        .await?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn list_rules(State(state): State<AppState>) -> ApiResult<Json<Vec<RuleResponse>>> {
    let rules = state.rules.list_all().await?;
    Ok(Json(rules.into_iter().map(RuleResponse::from).collect()))
}

#[derive(Deserialize)]
pub struct CreateRuleRequest {
    pub method_name: String,
    pub email: Option<String>,
    pub action: String,
    pub custom_response: Option<String>,
    pub remark: Option<String>,
    #[serde(default)]
    pub is_global: bool,
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(req): Json<CreateRuleRequest>,
) -> ApiResult<(StatusCode, Json<RuleResponse>)> {
    let rule = state
        .rules
        .create(
            &req.method_name,
            &req.action,
            req.custom_response.as_deref(),
            req.email.as_deref(),
            req.is_global,
            req.remark.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(rule.into())))
}

#[derive(Deserialize)]
pub struct UpdateRuleRequest {
    pub method_name: Option<String>,
    pub email: Option<String>,
    pub action: Option<String>,
    pub custom_response: Option<String>,
    pub remark: Option<String>,
    pub is_enabled: Option<bool>,
    pub is_global: Option<bool>,
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
    Json(req): Json<UpdateRuleRequest>,
) -> ApiResult<Json<RuleResponse>> {
    let rule = state
        .rules
        .update(
            rule_id,
            req.method_name.as_deref(),
            req.action.as_deref(),
            req.custom_response.as_deref(),
            req.is_enabled,
            req.email.as_deref(),
            req.is_global,
            req.remark.as_deref(),
        )
        .await?;
    Ok(Json(rule.into()))
}

pub async fn delete_rule(State(state): State<AppState>, Path(rule_id): Path<i64>) -> ApiResult<StatusCode> {
    state.rules.delete(rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_commands(State(state): State<AppState>) -> ApiResult<Json<Vec<CommandResponse>>> {
    let commands = state.commands.list_all().await?;
    Ok(Json(commands.into_iter().map(CommandResponse::from).collect()))
}

#[derive(Deserialize)]
pub struct UpdateCommandRequest {
    pub status: String,
    pub notes: Option<String>,
}

pub async fn update_command(
    State(state): State<AppState>,
    Path(command_id): Path<i64>,
    Json(req): Json<UpdateCommandRequest>,
) -> ApiResult<Json<CommandResponse>> {
    let command = state.commands.update_status(command_id, &req.status, req.notes.as_deref()).await?;
    Ok(Json(command.into()))
}

pub async fn send_command(
    State(state): State<AppState>,
    Path(command_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let device_response = state.commands.send_to_device(command_id).await?;
    Ok(Json(serde_json::json!({
        "status": "success",
        "message": "Command sent to device successfully",
        "device_response": device_response,
    })))
}

#[derive(Deserialize)]
pub struct ListLogsQuery {
    pub method: Option<String>,
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}
fn default_limit() -> i64 {
    50
}

#[derive(Serialize)]
pub struct PaginatedLogsResponse {
    pub data: Vec<RequestLogResponse>,
    pub total: i64,
}

pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<ListLogsQuery>,
) -> ApiResult<Json<PaginatedLogsResponse>> {
    let offset = (query.page.max(1) - 1) * query.limit;
    let (logs, total) = state
        .logs
        .list(query.method.as_deref(), query.search.as_deref(), query.limit, offset)
        .await?;
    Ok(Json(PaginatedLogsResponse {
        data: logs.into_iter().map(RequestLogResponse::from).collect(),
        total,
    }))
}

pub async fn list_log_methods(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.logs.list_methods().await?))
}

pub async fn list_log_emails(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.logs.list_emails().await?))
}

pub async fn log_stats(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let (_, total) = state.logs.list(None, None, 1, 0).await?;
    let methods = state.logs.list_methods().await?;
    let emails = state.logs.list_emails().await?;
    Ok(Json(serde_json::json!({
        "total_logs": total,
        "methods_count": methods.len(),
        "emails_count": emails.len(),
        "methods": methods,
        "emails": emails,
    })))
}

pub async fn healthz() -> impl IntoResponse {
    "ok"
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> axum::response::Response {
    match state.metrics.render() {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!(?err, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}
