//! Bearer-token resolution against the sessions table. Token issuance,
//! refresh, and password flows live in the auth service; this backend
//! only answers "whose request is this".

use axum::http::{header, HeaderMap};
use serde::Serialize;
use sqlx::Row;
use thiserror::Error;

use crate::db::card_store::SqliteCardStore;

const AUTH_COOKIE_NAME: &str = "auth_token";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("database error: {0}")]
    Database(String),
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = get_cookie(headers, AUTH_COOKIE_NAME) {
        return Some(token);
    }

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())?;

    auth_header
        .strip_prefix("Bearer ")
        .map(|value| value.to_string())
}

pub async fn verify_request_token(
    store: &SqliteCardStore,
    token: &str,
) -> Result<AuthUser, AuthError> {
    if token.trim().is_empty() {
        return Err(AuthError::MissingToken);
    }

    let row = sqlx::query(
        r#"
        SELECT u."id", u."email", u."username"
        FROM "sessions" s
        JOIN "users" u ON u."id" = s."userId"
        WHERE s."token" = ?
        LIMIT 1
        "#,
    )
    .bind(token)
    .fetch_optional(store.pool())
    .await
    .map_err(|err| AuthError::Database(err.to_string()))?;

    let Some(row) = row else {
        return Err(AuthError::InvalidToken);
    };

    Ok(AuthUser {
        id: row.try_get("id").unwrap_or_default(),
        email: row.try_get("email").unwrap_or_default(),
        username: row.try_get("username").unwrap_or_default(),
    })
}

fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie_header = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())?;

    for pair in cookie_header.split(';') {
        let mut iter = pair.trim().splitn(2, '=');
        if iter.next() == Some(name) {
            return iter.next().map(|value| value.to_string());
        }
    }
    None
}
