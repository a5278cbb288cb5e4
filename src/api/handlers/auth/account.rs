//! Account lifecycle endpoints: signup, signin, signout.

use anyhow::Context;
use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::error;

use crate::token::{VerificationClaims, VerificationKind, VerificationStage};

use super::error::AuthError;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::{
    clear_cookie, cookie_value, issue_refresh_cookie, sign_access_token, REFRESH_COOKIE_NAME,
};
use super::state::AuthState;
use super::storage::SignupOutcome;
use super::types::{
    MessageResponse, SigninRequest, SignupRequest, StageResponse, TokenResponse,
};
use super::utils::{extract_client_ip, hash_refresh_token, normalize_email, valid_email};
use super::verification::sign_verification_cookie;
use super::{password, utils};

/// Register a new account and start email confirmation.
///
/// A verified account with the same email is a conflict; a stale
/// unverified one is superseded so an abandoned signup can be retried.
#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created, confirmation code sent", body = StageResponse),
        (status = 400, description = "Missing payload or invalid email", body = MessageResponse),
        (status = 409, description = "Email already registered and verified", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn signup(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload"));
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(AuthError::BadRequest("Invalid email address"));
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Signup)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::TooManyRequests("Rate limited"));
    }

    let password_hash = password::hash(&request.password)?;
    let otp = utils::generate_otp();
    let code_hash = password::hash(&otp)?;

    let outcome = auth_state
        .store()
        .create_account(
            request.name.trim(),
            &email,
            &password_hash,
            &code_hash,
            auth_state.config().code_ttl_seconds(),
        )
        .await?;
    let user = match outcome {
        SignupOutcome::Created(user) => user,
        SignupOutcome::Conflict => {
            return Err(AuthError::Conflict("Email already has registered"));
        }
    };

    let claims = VerificationClaims::new(
        user.id,
        VerificationKind::ConfirmEmail,
        Utc::now(),
        auth_state.config().verification_token_ttl_seconds(),
    );
    let cookie = sign_verification_cookie(auth_state.config(), &claims)?;

    if let Err(err) =
        auth_state
            .code_sender()
            .send_code(&user.email, &otp, VerificationKind::ConfirmEmail)
    {
        // The account exists and the code can be resent; don't fail signup.
        error!("Failed to deliver confirmation code: {err:#}");
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);
    Ok((
        StatusCode::CREATED,
        response_headers,
        Json(StageResponse {
            message: "User registered successfully. Please check your email for verification code."
                .to_string(),
            stage: VerificationStage::CodeVerification,
        }),
    ))
}

/// Authenticate with email + password and open a session.
///
/// Unknown email and wrong password produce the same response, and the
/// per-user session cap is enforced before the new token is issued.
#[utoipa::path(
    post,
    path = "/v1/auth/signin",
    request_body = SigninRequest,
    responses(
        (status = 200, description = "Signed in; access token in body, refresh token in cookie", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn signin(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SigninRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload"));
    };

    let email = normalize_email(&request.email);
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Signin)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::Signin)
            == RateLimitDecision::Limited
    {
        return Err(AuthError::TooManyRequests("Rate limited"));
    }

    // One failure message for both paths; never reveal which one happened.
    let Some(user) = auth_state.store().find_verified_by_email(&email).await? else {
        return Err(AuthError::Unauthorized("Invalid credentials"));
    };
    if !password::verify(&request.password, &user.password_hash) {
        return Err(AuthError::Unauthorized("Invalid credentials"));
    }

    // Session cap: drop the oldest active token before issuing a new one.
    if auth_state.store().count_active(user.id).await? >= auth_state.config().session_cap() {
        auth_state.store().delete_oldest_active(user.id).await?;
    }

    let access_token = sign_access_token(auth_state.config(), user.id)?;
    let refresh_cookie = issue_refresh_cookie(&auth_state, user.id).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, refresh_cookie);
    Ok((
        StatusCode::OK,
        response_headers,
        Json(TokenResponse {
            message: "Logged in successfully".to_string(),
            access_token,
        }),
    ))
}

/// Close the current session. Idempotent: a missing cookie or an already
/// deleted token answers exactly like a successful signout.
#[utoipa::path(
    post,
    path = "/v1/auth/signout",
    responses(
        (status = 200, description = "Session closed (or was already closed)", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn signout(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    if let Some(raw) = cookie_value(&headers, REFRESH_COOKIE_NAME) {
        let hash = hash_refresh_token(&raw);
        auth_state.store().delete_by_hash(&hash).await?;
    }

    let mut response_headers = HeaderMap::new();
    let cookie = clear_cookie(auth_state.config(), REFRESH_COOKIE_NAME)
        .context("failed to build signout cookie")?;
    response_headers.insert(SET_COOKIE, cookie);
    Ok((
        StatusCode::OK,
        response_headers,
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    ))
}
