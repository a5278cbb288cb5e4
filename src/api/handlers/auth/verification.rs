//! One-time-code endpoints shared by email confirmation and password reset.
//!
//! Both flows ride the same mechanism, discriminated by the kind and, for
//! password reset, an explicit stage carried inside the signed
//! verification cookie. The stage travels in a value the client cannot
//! forge, so steps cannot be skipped.

use anyhow::Context;
use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::error;

use crate::token::{self, VerificationClaims, VerificationKind, VerificationStage};

use super::error::AuthError;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::{
    build_cookie, clear_cookie, cookie_value, issue_refresh_cookie, sign_access_token,
    VERIFICATION_COOKIE_NAME,
};
use super::state::{AuthConfig, AuthState};
use super::storage::ResendOutcome;
use super::types::{
    ForgotPasswordRequest, MessageResponse, ResetPasswordRequest, StageResponse, TokenResponse,
    VerifyOtpRequest,
};
use super::utils::{extract_client_ip, normalize_email};
use super::{password, utils};

/// Sign a verification payload and wrap it in its cookie; cookie max-age
/// equals the token TTL so the two can never drift apart.
pub(super) fn sign_verification_cookie(
    config: &AuthConfig,
    claims: &VerificationClaims,
) -> Result<HeaderValue, anyhow::Error> {
    let signed = token::sign_hs256(config.verification_token_secret(), claims)
        .context("failed to sign verification token")?;
    build_cookie(
        config,
        VERIFICATION_COOKIE_NAME,
        &signed,
        config.verification_token_ttl_seconds(),
    )
    .context("failed to build verification cookie")
}

/// Fail-closed decode of a verification cookie value.
fn decode_verification_claims(config: &AuthConfig, raw: &str) -> Option<VerificationClaims> {
    token::verify_hs256(raw, config.verification_token_secret(), Utc::now().timestamp()).ok()
}

/// Check the submitted OTP and advance whichever flow the cookie belongs to.
///
/// Email confirmation finishes here (tokens issued as in signin — OTP
/// possession is the credential); password reset advances to its
/// password-entry stage without issuing any session token yet.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Code accepted; flow advanced", body = TokenResponse),
        (status = 400, description = "Expired session, wrong stage, or wrong code", body = MessageResponse),
        (status = 401, description = "Missing or invalid verification session", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> Result<Response, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload"));
    };

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyOtp)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::TooManyRequests("Rate limited"));
    }

    let Some(raw) = cookie_value(&headers, VERIFICATION_COOKIE_NAME) else {
        return Err(AuthError::Unauthorized("Invalid or expired verification session"));
    };
    let Some(claims) = decode_verification_claims(auth_state.config(), &raw) else {
        return Err(AuthError::Unauthorized("Invalid or expired verification session"));
    };

    // Password reset may only verify a code while in its first stage.
    if claims.kind == VerificationKind::PasswordReset
        && claims.stage != Some(VerificationStage::CodeVerification)
    {
        return Err(AuthError::BadRequest("Invalid operation for current stage"));
    }

    let Some(code) = auth_state.store().find_code(claims.sub, claims.kind).await? else {
        return Err(AuthError::BadRequest(
            "Verification session expired. Please request again",
        ));
    };
    if code.is_expired(Utc::now()) {
        return Err(AuthError::BadRequest(
            "Verification session expired. Please request again",
        ));
    }

    if !password::verify(request.otp.trim(), &code.code_hash) {
        return Err(AuthError::BadRequest("Invalid verification OTP"));
    }

    let Some(user) = auth_state.store().find_by_id(claims.sub).await? else {
        return Err(AuthError::NotFound("User not found"));
    };

    // Single use: the code is gone after its first successful check.
    auth_state.store().delete_codes(claims.sub, claims.kind).await?;

    match claims.kind {
        VerificationKind::ConfirmEmail => {
            auth_state.store().mark_email_verified(user.id).await?;

            let access_token = sign_access_token(auth_state.config(), user.id)?;
            let refresh_cookie = issue_refresh_cookie(&auth_state, user.id).await?;

            let mut response_headers = HeaderMap::new();
            response_headers.append(
                SET_COOKIE,
                clear_cookie(auth_state.config(), VERIFICATION_COOKIE_NAME)
                    .context("failed to clear verification cookie")?,
            );
            response_headers.append(SET_COOKIE, refresh_cookie);
            Ok((
                StatusCode::OK,
                response_headers,
                Json(TokenResponse {
                    message: "Email verified successfully".to_string(),
                    access_token,
                }),
            )
                .into_response())
        }
        VerificationKind::PasswordReset => {
            // Re-sign with the advanced stage; no session tokens yet, the
            // password has not been changed.
            let next = VerificationClaims::new(
                user.id,
                VerificationKind::PasswordReset,
                Utc::now(),
                auth_state.config().verification_token_ttl_seconds(),
            )
            .with_stage(VerificationStage::PasswordReset)
            .code_verified();
            let cookie = sign_verification_cookie(auth_state.config(), &next)?;

            let mut response_headers = HeaderMap::new();
            response_headers.insert(SET_COOKIE, cookie);
            Ok((
                StatusCode::OK,
                response_headers,
                Json(StageResponse {
                    message: "Code verified successfully. You can now reset your password."
                        .to_string(),
                    stage: VerificationStage::PasswordReset,
                }),
            )
                .into_response())
        }
    }
}

/// Replace the pending code with a fresh one, subject to the cooldown.
#[utoipa::path(
    post,
    path = "/v1/auth/resend-otp",
    responses(
        (status = 200, description = "New code sent", body = StageResponse),
        (status = 400, description = "No pending code or wrong stage", body = MessageResponse),
        (status = 404, description = "No verification session", body = MessageResponse),
        (status = 429, description = "Cooldown not elapsed", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn resend_otp(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ResendOtp)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::TooManyRequests("Rate limited"));
    }

    let Some(raw) = cookie_value(&headers, VERIFICATION_COOKIE_NAME) else {
        return Err(AuthError::NotFound("No active code verification session"));
    };
    let Some(claims) = decode_verification_claims(auth_state.config(), &raw) else {
        return Err(AuthError::Unauthorized("Invalid or expired token"));
    };

    if claims.kind == VerificationKind::PasswordReset {
        if let Some(stage) = claims.stage {
            if stage != VerificationStage::CodeVerification {
                return Err(AuthError::BadRequest("Cannot resend code at this stage"));
            }
        }
    }

    // Hash the replacement up front; the store decides atomically whether
    // the swap is allowed, so racing resends leave one code behind.
    let otp = utils::generate_otp();
    let code_hash = password::hash(&otp)?;
    let outcome = auth_state
        .store()
        .replace_code_after_cooldown(
            claims.sub,
            claims.kind,
            &code_hash,
            auth_state.config().code_ttl_seconds(),
            auth_state.config().resend_cooldown_seconds(),
        )
        .await?;

    match outcome {
        ResendOutcome::Missing => Err(AuthError::BadRequest(
            "Invalid or expired verification code",
        )),
        ResendOutcome::Cooldown => Err(AuthError::TooManyRequests(
            "Too many requests, please wait before request",
        )),
        ResendOutcome::Replaced => {
            let Some(user) = auth_state.store().find_by_id(claims.sub).await? else {
                return Err(AuthError::NotFound("User not found"));
            };
            if let Err(err) = auth_state
                .code_sender()
                .send_code(&user.email, &otp, claims.kind)
            {
                error!("Failed to deliver resent code: {err:#}");
            }
            Ok((
                StatusCode::OK,
                Json(StageResponse {
                    message: "New verification code sent".to_string(),
                    stage: VerificationStage::CodeVerification,
                }),
            ))
        }
    }
}

/// Start the password-reset flow.
///
/// The response is identical whether or not the email maps to an account,
/// and the adaptive hash runs either way so timing does not leak account
/// existence.
#[utoipa::path(
    post,
    path = "/v1/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Generic acknowledgement, code sent if the account exists", body = StageResponse),
        (status = 400, description = "Missing payload", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<Response, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload"));
    };

    let email = normalize_email(&request.email);
    let generic_body = || {
        Json(StageResponse {
            message: "If an account exists with this email, you will receive a password reset code."
                .to_string(),
            stage: VerificationStage::CodeVerification,
        })
    };

    let client_ip = extract_client_ip(&headers);
    let limited = auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ForgotPassword)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::ForgotPassword)
            == RateLimitDecision::Limited;

    let user = if limited {
        // Keep the response opaque even when throttled.
        None
    } else {
        auth_state.store().find_verified_by_email(&email).await?
    };

    let Some(user) = user else {
        // Same hashing cost as the found path, same body as every path.
        let _ = password::hash(password::TIMING_PLACEHOLDER)?;
        return Ok((StatusCode::OK, generic_body()).into_response());
    };

    let otp = utils::generate_otp();
    let code_hash = password::hash(&otp)?;
    auth_state
        .store()
        .replace_code(
            user.id,
            VerificationKind::PasswordReset,
            &code_hash,
            auth_state.config().code_ttl_seconds(),
        )
        .await?;

    let claims = VerificationClaims::new(
        user.id,
        VerificationKind::PasswordReset,
        Utc::now(),
        auth_state.config().verification_token_ttl_seconds(),
    )
    .with_stage(VerificationStage::CodeVerification);
    let cookie = sign_verification_cookie(auth_state.config(), &claims)?;

    if let Err(err) = auth_state
        .code_sender()
        .send_code(&user.email, &otp, VerificationKind::PasswordReset)
    {
        error!("Failed to deliver password reset code: {err:#}");
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);
    Ok((StatusCode::OK, response_headers, generic_body()).into_response())
}

/// Finish the password-reset flow.
///
/// All three claims (kind, code verified, stage) must line up before the
/// store is touched; success swaps the password, revokes every session,
/// and purges remaining reset codes in one transaction.
#[utoipa::path(
    post,
    path = "/v1/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password replaced; all sessions revoked", body = StageResponse),
        (status = 400, description = "Code not verified yet", body = MessageResponse),
        (status = 401, description = "Invalid reset session", body = MessageResponse),
        (status = 404, description = "No reset session or unknown user", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload"));
    };

    let Some(raw) = cookie_value(&headers, VERIFICATION_COOKIE_NAME) else {
        return Err(AuthError::NotFound("Password reset session expired"));
    };
    let Some(claims) = decode_verification_claims(auth_state.config(), &raw) else {
        return Err(AuthError::Unauthorized("Invalid password reset session"));
    };
    if claims.kind != VerificationKind::PasswordReset || !claims.code_verified {
        return Err(AuthError::Unauthorized("Invalid password reset session"));
    }
    if claims.stage != Some(VerificationStage::PasswordReset) {
        return Err(AuthError::BadRequest("Please verify your code first"));
    }

    let Some(user) = auth_state.store().find_by_id(claims.sub).await? else {
        return Err(AuthError::NotFound("User not found"));
    };
    if !user.email_verified {
        return Err(AuthError::NotFound("User not found"));
    }

    let new_password_hash = password::hash(&request.password)?;
    auth_state
        .store()
        .reset_credentials(user.id, &new_password_hash)
        .await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        SET_COOKIE,
        clear_cookie(auth_state.config(), VERIFICATION_COOKIE_NAME)
            .context("failed to clear verification cookie")?,
    );
    Ok((
        StatusCode::OK,
        response_headers,
        Json(StageResponse {
            message: "Password reset successfully. Please login with your new password."
                .to_string(),
            stage: VerificationStage::Completed,
        }),
    ))
}
