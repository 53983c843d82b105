//! Admin principal resolution for the management routes.
//!
//! A session token arrives either as `Authorization: Bearer <token>` or in the
//! auth provider's session cookie, whose value is `<token>.<signature>` with
//! `signature = base64(HMAC-SHA256(auth secret, token))`.

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::database::models::User;
use crate::database::repository::UserStore;
use crate::error::{AppError, AppErrorKind, AuthError};
use crate::payments::signature::secure_eq;

type HmacSha256 = Hmac<Sha256>;

pub struct AdminGuard {
    users: Arc<dyn UserStore>,
    cookie_name: String,
    secret: String,
}

impl AdminGuard {
    pub fn new(users: Arc<dyn UserStore>, config: &AuthConfig) -> Self {
        Self {
            users,
            cookie_name: config.session_cookie.clone(),
            secret: config.secret.clone(),
        }
    }

    /// Resolves the caller and requires `platform_role = admin`.
    pub async fn require_admin(&self, headers: &HeaderMap) -> Result<User, AppError> {
        let token = self
            .session_token(headers)
            .ok_or_else(|| AppError::new(AppErrorKind::Authentication(AuthError::Unauthorized)))?;

        let user = self
            .users
            .find_by_session_token(&token)
            .await?
            .ok_or_else(|| AppError::new(AppErrorKind::Authentication(AuthError::Unauthorized)))?;

        if !user.is_admin() {
            warn!(user_id = %user.id, "Non-admin user attempted an admin operation");
            return Err(AppError::new(AppErrorKind::Authentication(AuthError::Forbidden)));
        }

        debug!(user_id = %user.id, "Admin principal resolved");
        Ok(user)
    }

    fn session_token(&self, headers: &HeaderMap) -> Option<String> {
        bearer_token(headers).or_else(|| {
            let raw = cookie_value(headers, &self.cookie_name)?;
            verify_signed_cookie(&raw, &self.secret)
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| percent_decode(value))
}

/// Only the escapes base64 output can produce.
fn percent_decode(value: &str) -> String {
    value
        .replace("%2B", "+")
        .replace("%2b", "+")
        .replace("%2F", "/")
        .replace("%2f", "/")
        .replace("%3D", "=")
        .replace("%3d", "=")
}

fn verify_signed_cookie(value: &str, secret: &str) -> Option<String> {
    let (token, signature) = value.rsplit_once('.')?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(token.as_bytes());
    let expected = STANDARD.encode(mac.finalize().into_bytes());

    if secure_eq(expected.as_bytes(), signature.as_bytes()) {
        Some(token.to_string())
    } else {
        warn!("Session cookie signature mismatch");
        None
    }
}

#[cfg(test)]
pub(crate) fn sign_cookie(token: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(token.as_bytes());
    format!("{}.{}", token, STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::database::models::PlatformRole;
    use crate::error::ErrorCode;
    use chrono::{Duration, Utc};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    async fn guard() -> AdminGuard {
        let store = MemoryStore::new();
        store.insert_user("admin", "admin@example.com", 1, PlatformRole::Admin).await;
        store.insert_user("u1", "u1@example.com", 1, PlatformRole::User).await;
        let expires = Utc::now() + Duration::hours(1);
        store.insert_session("admin-token", "admin", expires).await;
        store.insert_session("user-token", "u1", expires).await;
        store
            .insert_session("stale-token", "admin", Utc::now() - Duration::hours(1))
            .await;

        AdminGuard::new(
            Arc::new(store),
            &AuthConfig {
                secret: SECRET.to_string(),
                session_cookie: "plushify.session_token".to_string(),
            },
        )
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, format!("Bearer {}", token).parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn admin_bearer_token_is_accepted() {
        let user = guard().await.require_admin(&bearer("admin-token")).await.unwrap();
        assert_eq!(user.id, "admin");
    }

    #[tokio::test]
    async fn missing_or_expired_session_is_unauthorized() {
        let guard = guard().await;
        for headers in [HeaderMap::new(), bearer("stale-token"), bearer("nope")] {
            let err = guard.require_admin(&headers).await.unwrap_err();
            assert_eq!(err.error_code(), ErrorCode::Unauthorized);
            assert_eq!(err.user_message(), "Unauthorized");
        }
    }

    #[tokio::test]
    async fn non_admin_is_forbidden() {
        let err = guard().await.require_admin(&bearer("user-token")).await.unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.user_message(), "Admin access required");
    }

    #[tokio::test]
    async fn signed_cookie_is_accepted() {
        let mut headers = HeaderMap::new();
        let cookie = sign_cookie("admin-token", SECRET)
            .replace('+', "%2B")
            .replace('/', "%2F")
            .replace('=', "%3D");
        headers.insert(
            header::COOKIE,
            format!("theme=dark; plushify.session_token={}", cookie).parse().unwrap(),
        );

        let user = guard().await.require_admin(&headers).await.unwrap();
        assert_eq!(user.id, "admin");
    }

    #[tokio::test]
    async fn tampered_cookie_is_rejected() {
        let mut headers = HeaderMap::new();
        let forged = sign_cookie("user-token", SECRET).replace("user-token", "admin-token");
        headers.insert(
            header::COOKIE,
            format!("plushify.session_token={}", forged).parse().unwrap(),
        );

        let err = guard().await.require_admin(&headers).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::Unauthorized);
    }
}
