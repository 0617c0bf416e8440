use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use shop_backup_auth::{AdminGuard, AdminIdentity};
use shop_backup_core::{DatabaseInfo, RestoreRequest, RestoreSummary};
use shop_backup_storage::BackupRepository;
use tracing::{error, info};

use crate::error::ApiError;

/// Upper bound for restore uploads.
pub const MAX_RESTORE_BODY_BYTES: usize = 512 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub repo: BackupRepository,
    pub guard: AdminGuard,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/healthz", get(healthz))
        .route("/api/admin/backup/export", get(export_backup))
        .route(
            "/api/admin/backup/restore",
            post(restore_backup).layer(DefaultBodyLimit::max(MAX_RESTORE_BODY_BYTES)),
        )
        .route("/api/admin/backup/info", get(backup_info))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

/// Token from an `Authorization: Bearer <token>` header. The scheme name is
/// matched case-insensitively.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<AdminIdentity, ApiError> {
    Ok(state.guard.require_admin(bearer_token(headers)).await?)
}

async fn export_backup(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let admin = require_admin(&state, &headers).await?;
    info!(user_id = %admin.user_id, "backup export requested");

    let backup = state.repo.export().await.map_err(|e| {
        error!(error = %e, "backup export failed");
        ApiError::Internal(format!("Backup export failed: {e:#}"))
    })?;
    let bytes = backup
        .to_pretty_json()
        .map_err(|e| ApiError::Internal(format!("Backup export failed: {e}")))?;

    let headers = [
        (header::CONTENT_TYPE, "application/json".to_owned()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}", backup.file_name()),
        ),
        (header::CONTENT_LENGTH, bytes.len().to_string()),
    ];
    info!(bytes = bytes.len(), file = %backup.file_name(), "backup export ready");
    Ok((headers, bytes).into_response())
}

async fn restore_backup(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RestoreSummary>, ApiError> {
    let admin = require_admin(&state, &headers).await?;
    let backup = RestoreRequest::decode(&body)?;
    info!(
        user_id = %admin.user_id,
        source = backup.database.as_deref().unwrap_or("unknown"),
        "backup restore requested"
    );
    Ok(Json(state.repo.restore(&backup).await))
}

async fn backup_info(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<DatabaseInfo>, ApiError> {
    require_admin(&state, &headers).await?;
    let info = state.repo.info().await.map_err(|e| {
        error!(error = %e, "reading collection counts failed");
        ApiError::Internal(format!("Could not read database info: {e:#}"))
    })?;
    Ok(Json(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_authorization(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        for value in ["Bearer abc", "bearer abc", "BEARER  abc"] {
            assert_eq!(bearer_token(&with_authorization(value)), Some("abc"), "{value}");
        }
    }

    #[test]
    fn other_schemes_and_empty_tokens_are_ignored() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
        assert_eq!(bearer_token(&with_authorization("Basic abc")), None);
        assert_eq!(bearer_token(&with_authorization("Bearer")), None);
        assert_eq!(bearer_token(&with_authorization("Bearerabc")), None);
    }
}
