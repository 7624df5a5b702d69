use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use docbackup_core::{
    BackupFilter, BackupRecord, BackupResult, RestoreOptions, RestoreOutcome, TriggeredBy,
    VerificationResult,
};
use docbackup_engine::{BackupConfig, BackupEngine, EngineError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub engine: BackupEngine,
    pub api_token: Option<String>,
    /// Used when a request enables encryption without its own key.
    pub encryption_key: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid bearer token")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<EngineError>() {
            Some(EngineError::NotFound(_) | EngineError::LocationNotFound { .. }) => {
                ApiError::NotFound(err.to_string())
            }
            Some(EngineError::Configuration(_) | EngineError::ProviderNotRegistered(_)) => {
                ApiError::BadRequest(err.to_string())
            }
            None => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorBody {
            error: match &self {
                ApiError::Internal(_) => "internal server error".to_owned(),
                other => other.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/healthz", get(healthz))
        .route("/api/v1/backups", get(list_backups).post(create_backup))
        .route("/api/v1/backups/{id}", get(backup_detail).delete(delete_backup))
        .route("/api/v1/backups/{id}/restore", post(restore_backup))
        .route("/api/v1/backups/{id}/verify", post(verify_backup))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

fn require_api_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.api_token else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid backup id {raw:?}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBackupRequest {
    #[serde(flatten)]
    config: BackupConfig,
    #[serde(default)]
    triggered_by: TriggeredBy,
    #[serde(default)]
    schedule_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreRequest {
    provider: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(flatten)]
    options: RestoreOptions,
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    provider: String,
    #[serde(default)]
    key: Option<String>,
}

async fn list_backups(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<BackupFilter>,
) -> Result<Json<Vec<BackupRecord>>, ApiError> {
    require_api_auth(&state, &headers)?;
    Ok(Json(state.engine.list_backups(&filter).await?))
}

async fn create_backup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateBackupRequest>,
) -> Result<(StatusCode, Json<BackupResult>), ApiError> {
    require_api_auth(&state, &headers)?;
    let mut config = request.config;
    if config.encryption && config.encryption_key.is_none() {
        config.encryption_key = state.encryption_key.clone();
    }
    let result = state
        .engine
        .create_backup(&config, request.triggered_by, request.schedule_id)
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn backup_detail(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BackupRecord>, ApiError> {
    require_api_auth(&state, &headers)?;
    let id = parse_id(&id)?;
    Ok(Json(state.engine.get_backup(id).await?))
}

async fn delete_backup(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_api_auth(&state, &headers)?;
    let id = parse_id(&id)?;
    state.engine.delete_backup(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn restore_backup(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RestoreRequest>,
) -> Result<Json<RestoreOutcome>, ApiError> {
    require_api_auth(&state, &headers)?;
    let id = parse_id(&id)?;
    let key = request.key.or_else(|| state.encryption_key.clone());
    let outcome = state
        .engine
        .restore_backup(id, &request.options, &request.provider, key.as_deref())
        .await?;
    Ok(Json(outcome))
}

async fn verify_backup(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerificationResult>, ApiError> {
    require_api_auth(&state, &headers)?;
    let id = parse_id(&id)?;
    let key = request.key.or_else(|| state.encryption_key.clone());
    let result = state
        .engine
        .verify_backup(id, &request.provider, key.as_deref())
        .await?;
    Ok(Json(result))
}
