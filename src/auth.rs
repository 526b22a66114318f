//! Identity delegate boundary.
//!
//! Credentials are validated upstream by the hosted identity provider; by the
//! time a request reaches this server the bearer token is an opaque,
//! already-authenticated subject. We only map that subject to a local user
//! row, creating a minimal one on first sight.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::{error::AppError, state::AppState};

#[derive(Clone, Copy, Debug)]
pub struct Principal {
    pub user_id: i64,
}

pub fn bearer_sub(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (kind, token) = value.split_once(' ')?;
    let token = token.trim();

    (kind == "Bearer" && !token.is_empty()).then(|| token.to_string())
}

pub async fn resolve_user(pool: &SqlitePool, auth_sub: &str) -> Result<i64, AppError> {
    let user_id = sqlx::query_scalar(
        "INSERT INTO users (auth_sub, username, created_at) VALUES (?, ?, ?)
         ON CONFLICT (auth_sub) DO UPDATE SET auth_sub = excluded.auth_sub
         RETURNING id",
    )
    .bind(auth_sub)
    .bind(auth_sub)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(user_id)
}

/// Viewer identity for endpoints that work both anonymously and signed in.
pub async fn optional_user(
    pool: &SqlitePool,
    headers: &HeaderMap,
) -> Result<Option<i64>, AppError> {
    match bearer_sub(headers) {
        Some(sub) => Ok(Some(resolve_user(pool, &sub).await?)),
        None => Ok(None),
    }
}

pub async fn require_user(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let sub = bearer_sub(request.headers()).ok_or(AppError::Unauthorized)?;
    let user_id = resolve_user(&state.pool, &sub).await?;

    request.extensions_mut().insert(Principal { user_id });

    Ok(next.run(request).await)
}
