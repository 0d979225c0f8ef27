use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::auth;
use crate::config;
use crate::db;
use crate::model::{JobLog, Post, Settings, TranslationJob};
use crate::server::AppState;

/// Number of jobs returned to the dashboard.
pub const RECENT_JOBS_LIMIT: i64 = 50;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing bearer token")]
    Unauthorized,
    #[error("invalid or expired session")]
    Forbidden,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0:#}")]
    Upstream(anyhow::Error),
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[instrument(skip_all, fields(username = %req.username))]
pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<LoginResponse> {
    if !auth::verify_admin(&state.pool, req.username.trim(), &req.password).await? {
        warn!("rejected login");
        return Err(ApiError::InvalidCredentials);
    }
    let hours = state.config.app.session_ttl_hours.min(config::MAX_SESSION_TTL_HOURS);
    let ttl = Duration::hours(hours as i64);
    let token = db::create_session(&state.pool, req.username.trim(), ttl).await?;
    info!("operator logged in");
    Ok(Json(LoginResponse { token }))
}

pub async fn get_settings(State(state): State<AppState>) -> ApiResult<Settings> {
    Ok(Json(db::load_settings(&state.pool).await?))
}

#[derive(Debug, Serialize)]
pub struct SaveSettingsResponse {
    pub success: bool,
    pub settings: Settings,
}

#[instrument(skip_all)]
pub async fn save_settings(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> ApiResult<SaveSettingsResponse> {
    let settings = settings.normalized();
    db::save_settings(&state.pool, &settings).await?;
    info!(?settings, "settings saved");
    Ok(Json(SaveSettingsResponse {
        success: true,
        settings,
    }))
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub valid: bool,
}

/// Check credentials from the request body without saving them.
#[instrument(skip_all)]
pub async fn connect(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> ApiResult<ConnectResponse> {
    let settings = settings.normalized();
    let content = state.gateways.content(&settings)?;
    let valid = content.validate_connection().await;
    Ok(Json(ConnectResponse { valid }))
}

#[derive(Debug, Serialize)]
pub struct PluginCheckResponse {
    pub installed: bool,
}

/// Probe for the multilingual plugin. Unsaved settings in the body take
/// precedence over the stored ones; an empty body means "use stored".
#[instrument(skip_all)]
pub async fn check_polylang(State(state): State<AppState>, body: Bytes) -> ApiResult<PluginCheckResponse> {
    let unsaved = serde_json::from_slice::<Settings>(&body)
        .ok()
        .filter(Settings::wp_configured);
    let settings = match unsaved {
        Some(settings) => settings.normalized(),
        None => db::load_settings(&state.pool).await?,
    };
    let content = state.gateways.content(&settings)?;
    let installed = content.check_language_plugin_active().await;
    Ok(Json(PluginCheckResponse { installed }))
}

#[derive(Debug, Serialize)]
pub struct PluginInstallResponse {
    pub success: bool,
}

#[instrument(skip_all)]
pub async fn install_polylang(State(state): State<AppState>) -> ApiResult<PluginInstallResponse> {
    let settings = db::load_settings(&state.pool).await?;
    let content = state.gateways.content(&settings)?;
    let success = content
        .install_language_plugin()
        .await
        .map_err(ApiError::Upstream)?;
    Ok(Json(PluginInstallResponse { success }))
}

/// Source-language posts of every enabled content type.
#[instrument(skip_all)]
pub async fn list_posts(State(state): State<AppState>) -> ApiResult<Vec<Post>> {
    let settings = db::load_settings(&state.pool).await?;
    if !settings.wp_configured() {
        return Err(ApiError::BadRequest("Configure settings first".to_string()));
    }
    let content = state.gateways.content(&settings)?;
    let mut posts = Vec::new();
    for post_type in &settings.post_types {
        let batch = content
            .fetch_posts(post_type, Some(&settings.source_lang))
            .await
            .map_err(ApiError::Upstream)?;
        posts.extend(batch);
    }
    Ok(Json(posts))
}

/// `postId` may be a single id or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(i64),
    Many(Vec<i64>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<i64> {
        match self {
            OneOrMany::One(id) => vec![id],
            OneOrMany::Many(ids) => ids,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    pub post_id: OneOrMany,
    #[serde(default)]
    pub post_type: Option<String>,
    #[serde(default)]
    pub target_langs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub jobs: Vec<String>,
}

#[instrument(skip_all)]
pub async fn translate(
    State(state): State<AppState>,
    Json(req): Json<TranslateRequest>,
) -> ApiResult<TranslateResponse> {
    let post_ids = req.post_id.into_vec();
    if post_ids.is_empty() {
        return Err(ApiError::BadRequest("postId must name at least one post".to_string()));
    }
    let target_langs = if req.target_langs.is_empty() {
        db::load_settings(&state.pool).await?.target_langs
    } else {
        req.target_langs
    };
    let post_type = req
        .post_type
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "post".to_string());

    let jobs = state.queue.enqueue(&post_ids, &post_type, &target_langs).await?;
    Ok(Json(TranslateResponse { jobs }))
}

pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Vec<TranslationJob>> {
    Ok(Json(db::list_recent_jobs(&state.pool, RECENT_JOBS_LIMIT).await?))
}

pub async fn job_logs(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Vec<JobLog>> {
    if db::get_job(&state.pool, &job_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Job not found: {}", job_id)));
    }
    Ok(Json(db::list_job_logs(&state.pool, &job_id).await?))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
