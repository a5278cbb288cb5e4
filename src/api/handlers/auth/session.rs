//! Refresh-token cookies and the rotation endpoint.

use anyhow::Context;
use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::token::{self, AccessClaims};

use super::error::AuthError;
use super::state::{AuthConfig, AuthState};
use super::storage::RotateOutcome;
use super::types::{MessageResponse, TokenResponse};
use super::utils::{generate_refresh_token, hash_refresh_token};

pub(super) const REFRESH_COOKIE_NAME: &str = "refresh_token";
pub(super) const VERIFICATION_COOKIE_NAME: &str = "verification_token";

/// Rotate the refresh token: consume the presented one, issue a
/// replacement, and return a fresh access token.
///
/// Presenting an already-consumed token is treated as theft: every session
/// of that user is revoked and the caller must authenticate again.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    responses(
        (status = 200, description = "New access token issued", body = TokenResponse),
        (status = 401, description = "Missing, invalid, expired, or stolen refresh token", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn rotate(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(presented) = cookie_value(&headers, REFRESH_COOKIE_NAME) else {
        return Err(AuthError::Unauthorized("Refresh token not found"));
    };
    let presented_hash = hash_refresh_token(&presented);

    // The replacement value is generated up front so the store can swap
    // consume + insert inside one transaction.
    let replacement = generate_refresh_token()?;
    let replacement_hash = hash_refresh_token(&replacement);

    let outcome = auth_state
        .store()
        .rotate(
            &presented_hash,
            &replacement_hash,
            auth_state.config().refresh_token_ttl_seconds(),
        )
        .await?;

    match outcome {
        RotateOutcome::Invalid => Err(AuthError::Unauthorized("Invalid or expired refresh_token")),
        RotateOutcome::Theft { .. } => {
            Err(AuthError::Unauthorized("Refresh token theft detected"))
        }
        RotateOutcome::Rotated { user_id } => {
            let access_token = sign_access_token(auth_state.config(), user_id)?;
            let cookie = build_cookie(
                auth_state.config(),
                REFRESH_COOKIE_NAME,
                &replacement,
                auth_state.config().refresh_token_ttl_seconds(),
            )
            .context("failed to build refresh cookie")?;
            let mut response_headers = HeaderMap::new();
            response_headers.insert(SET_COOKIE, cookie);
            Ok((
                StatusCode::OK,
                response_headers,
                Json(TokenResponse {
                    message: "Access Token re-generated".to_string(),
                    access_token,
                }),
            ))
        }
    }
}

/// Sign a short-lived access token for the response body.
pub(super) fn sign_access_token(
    config: &AuthConfig,
    user_id: Uuid,
) -> Result<String, anyhow::Error> {
    let claims = AccessClaims::new(user_id, Utc::now(), config.access_token_ttl_seconds());
    token::sign_hs256(config.access_token_secret(), &claims).context("failed to sign access token")
}

/// Store a new refresh token for the user and return its cookie.
/// Only the hash is persisted; the raw value lives in the cookie alone.
pub(super) async fn issue_refresh_cookie(
    state: &AuthState,
    user_id: Uuid,
) -> Result<HeaderValue, anyhow::Error> {
    let raw = generate_refresh_token()?;
    let hash = hash_refresh_token(&raw);
    state
        .store()
        .insert_token(user_id, &hash, state.config().refresh_token_ttl_seconds())
        .await?;
    build_cookie(
        state.config(),
        REFRESH_COOKIE_NAME,
        &raw,
        state.config().refresh_token_ttl_seconds(),
    )
    .context("failed to build refresh cookie")
}

/// Build a secure `HttpOnly` cookie; max-age matches the value's lifetime.
pub(super) fn build_cookie(
    config: &AuthConfig,
    name: &str,
    value: &str,
    max_age_seconds: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}");
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_cookie(
    config: &AuthConfig,
    name: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Read a cookie by name from the request headers.
pub(super) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name {
            return Some(val.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config() -> AuthConfig {
        AuthConfig::new(
            "https://parley.dev".to_string(),
            SecretString::from("access-secret"),
            SecretString::from("verification-secret"),
        )
    }

    #[test]
    fn cookie_value_finds_named_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("refresh_token=abc; verification_token=def"),
        );
        assert_eq!(
            cookie_value(&headers, REFRESH_COOKIE_NAME).as_deref(),
            Some("abc")
        );
        assert_eq!(
            cookie_value(&headers, VERIFICATION_COOKIE_NAME).as_deref(),
            Some("def")
        );
        assert_eq!(cookie_value(&headers, "other"), None);
    }

    #[test]
    fn build_cookie_carries_security_attributes() -> Result<(), InvalidHeaderValue> {
        let cookie = build_cookie(&config(), REFRESH_COOKIE_NAME, "raw", 60)?;
        let rendered = cookie.to_str().expect("ascii cookie");
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.contains("SameSite=Lax"));
        assert!(rendered.contains("Max-Age=60"));
        assert!(rendered.contains("Secure"));
        Ok(())
    }

    #[test]
    fn clear_cookie_expires_immediately() -> Result<(), InvalidHeaderValue> {
        let cookie = clear_cookie(&config(), VERIFICATION_COOKIE_NAME)?;
        let rendered = cookie.to_str().expect("ascii cookie");
        assert!(rendered.starts_with("verification_token=;"));
        assert!(rendered.contains("Max-Age=0"));
        Ok(())
    }

    #[test]
    fn access_token_verifies_with_signing_secret() -> anyhow::Result<()> {
        let config = config();
        let user_id = Uuid::new_v4();
        let signed = sign_access_token(&config, user_id)?;
        let claims: AccessClaims = token::verify_hs256(
            &signed,
            config.access_token_secret(),
            Utc::now().timestamp(),
        )?;
        assert_eq!(claims.sub, user_id);
        Ok(())
    }
}
