//! Operator login, session tokens and the bearer-token guard.
use anyhow::Result;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::db::{self, AdminCredentials, Pool};
use crate::handlers::ApiError;
use crate::server::AppState;

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Store the configured operator account, replacing any previous password.
#[instrument(skip_all, fields(username = %username))]
pub async fn seed_admin(pool: &Pool, username: &str, password: &str) -> Result<()> {
    let salt = Uuid::new_v4().simple().to_string();
    let creds = AdminCredentials {
        hash: hash_password(&salt, password),
        salt,
    };
    db::upsert_admin(pool, username, &creds).await?;
    info!("admin account ready");
    Ok(())
}

pub async fn verify_admin(pool: &Pool, username: &str, password: &str) -> Result<bool> {
    let Some(creds) = db::admin_credentials(pool, username).await? else {
        return Ok(false);
    };
    Ok(constant_time_eq(
        hash_password(&creds.salt, password).as_bytes(),
        creds.hash.as_bytes(),
    ))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Reject requests without a bearer token (401) or with an unknown or
/// expired one (403).
pub async fn require_session(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_owned);

    let Some(token) = token else {
        debug!(path = %request.uri().path(), "request without bearer token");
        return ApiError::Unauthorized.into_response();
    };

    match db::session_valid(&state.pool, &token).await {
        Ok(true) => next.run(request).await,
        Ok(false) => ApiError::Forbidden.into_response(),
        Err(err) => {
            error!(?err, "session lookup failed");
            ApiError::Internal(err).into_response()
        }
    }
}
