//! Signed bearer-token encoding and verification.
//!
//! Access and verification payloads are carried as compact HMAC-SHA256
//! signed tokens (JWT wire format). Verification fails closed: malformed,
//! mis-signed, or expired input yields an error variant, never a panic.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid token header")]
    InvalidHeader,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("invalid signing key")]
    InvalidKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

/// Which one-time-code flow a verification payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    ConfirmEmail,
    PasswordReset,
}

impl VerificationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfirmEmail => "confirm_email",
            Self::PasswordReset => "password_reset",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "confirm_email" => Some(Self::ConfirmEmail),
            "password_reset" => Some(Self::PasswordReset),
            _ => None,
        }
    }
}

/// Step of the password-reset flow, carried inside the signed payload so
/// clients cannot skip ahead by editing a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStage {
    CodeVerification,
    PasswordReset,
    Completed,
}

impl VerificationStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CodeVerification => "code_verification",
            Self::PasswordReset => "password_reset",
            Self::Completed => "completed",
        }
    }
}

/// Claim sets that can be signed and verified; `exp` drives the
/// fail-closed expiry check.
pub trait Claims: Serialize + DeserializeOwned {
    fn expires_at_unix(&self) -> i64;
}

/// Short-lived bearer payload returned in response bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
}

impl AccessClaims {
    #[must_use]
    pub fn new(user_id: Uuid, now: DateTime<Utc>, ttl_seconds: i64) -> Self {
        Self {
            sub: user_id,
            iat: now.timestamp(),
            exp: now.timestamp() + ttl_seconds,
        }
    }
}

impl Claims for AccessClaims {
    fn expires_at_unix(&self) -> i64 {
        self.exp
    }
}

/// Multi-step verification payload threaded through the
/// `verification_token` cookie instead of server-side session state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationClaims {
    pub sub: Uuid,
    pub kind: VerificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<VerificationStage>,
    #[serde(default)]
    pub code_verified: bool,
    pub iat: i64,
    pub exp: i64,
}

impl VerificationClaims {
    #[must_use]
    pub fn new(user_id: Uuid, kind: VerificationKind, now: DateTime<Utc>, ttl_seconds: i64) -> Self {
        Self {
            sub: user_id,
            kind,
            stage: None,
            code_verified: false,
            iat: now.timestamp(),
            exp: now.timestamp() + ttl_seconds,
        }
    }

    #[must_use]
    pub fn with_stage(mut self, stage: VerificationStage) -> Self {
        self.stage = Some(stage);
        self
    }

    #[must_use]
    pub fn code_verified(mut self) -> Self {
        self.code_verified = true;
        self
    }
}

impl Claims for VerificationClaims {
    fn expires_at_unix(&self) -> i64 {
        self.exp
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(segment).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Create an HMAC-SHA256 signed token for the given claims.
///
/// # Errors
///
/// Returns an error if the key is unusable or the claims cannot be encoded.
pub fn sign_hs256<T: Claims>(secret: &[u8], claims: &T) -> Result<String, Error> {
    let header_b64 = b64e_json(&TokenHeader::hs256())?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::InvalidKey)?;
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify an HMAC-SHA256 signed token and return its decoded claims.
///
/// The signature is checked before the claims are decoded, and the
/// comparison is constant-time (`Mac::verify_slice`).
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the header does not announce HS256,
/// - the signature does not match,
/// - the claims expired before `now_unix_seconds`.
pub fn verify_hs256<T: Claims>(
    token: &str,
    secret: &[u8],
    now_unix_seconds: i64,
) -> Result<T, Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() {
        return Err(Error::TokenFormat);
    }

    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != "HS256" || header.typ != "JWT" {
        return Err(Error::InvalidHeader);
    }

    let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
    let signing_input = format!("{header_b64}.{claims_b64}");
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::InvalidKey)?;
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| Error::InvalidSignature)?;

    let claims: T = b64d_json(claims_b64)?;
    if claims.expires_at_unix() < now_unix_seconds {
        return Err(Error::Expired);
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-signing-secret-at-least-32-bytes";

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn access_claims_round_trip() -> Result<(), Error> {
        let user_id = Uuid::new_v4();
        let claims = AccessClaims::new(user_id, now(), 900);
        let token = sign_hs256(SECRET, &claims)?;
        let decoded: AccessClaims = verify_hs256(&token, SECRET, now().timestamp())?;
        assert_eq!(decoded, claims);
        Ok(())
    }

    #[test]
    fn verification_claims_round_trip_with_stage() -> Result<(), Error> {
        let claims = VerificationClaims::new(Uuid::new_v4(), VerificationKind::PasswordReset, now(), 900)
            .with_stage(VerificationStage::PasswordReset)
            .code_verified();
        let token = sign_hs256(SECRET, &claims)?;
        let decoded: VerificationClaims = verify_hs256(&token, SECRET, now().timestamp())?;
        assert_eq!(decoded.stage, Some(VerificationStage::PasswordReset));
        assert!(decoded.code_verified);
        Ok(())
    }

    #[test]
    fn stage_serializes_snake_case() -> Result<(), Error> {
        let claims = VerificationClaims::new(Uuid::new_v4(), VerificationKind::ConfirmEmail, now(), 900);
        let value = serde_json::to_value(&claims)?;
        assert_eq!(
            value.get("kind").and_then(serde_json::Value::as_str),
            Some("confirm_email")
        );
        // Absent stage is omitted entirely, not serialized as null.
        assert!(value.get("stage").is_none());
        Ok(())
    }

    #[test]
    fn wrong_secret_rejected() {
        let claims = AccessClaims::new(Uuid::new_v4(), now(), 900);
        let token = sign_hs256(SECRET, &claims).expect("sign");
        let result = verify_hs256::<AccessClaims>(&token, b"another-secret", now().timestamp());
        assert!(matches!(result, Err(Error::InvalidSignature)));
    }

    #[test]
    fn tampered_payload_rejected() {
        let claims = AccessClaims::new(Uuid::new_v4(), now(), 900);
        let token = sign_hs256(SECRET, &claims).expect("sign");
        let forged = b64e_json(&AccessClaims::new(Uuid::new_v4(), now(), 9000)).expect("encode");
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = forged.as_str();
        let forged_token = parts.join(".");
        let result = verify_hs256::<AccessClaims>(&forged_token, SECRET, now().timestamp());
        assert!(matches!(result, Err(Error::InvalidSignature)));
    }

    #[test]
    fn expired_token_rejected() {
        let past = now() - chrono::Duration::seconds(1_000);
        let claims = AccessClaims::new(Uuid::new_v4(), past, 900);
        let token = sign_hs256(SECRET, &claims).expect("sign");
        let result = verify_hs256::<AccessClaims>(&token, SECRET, now().timestamp());
        assert!(matches!(result, Err(Error::Expired)));
    }

    #[test]
    fn malformed_tokens_rejected() {
        for garbage in ["", "a", "a.b", "a.b.c.d", "not base64.at.all"] {
            assert!(
                verify_hs256::<AccessClaims>(garbage, SECRET, now().timestamp()).is_err(),
                "{garbage:?} should be rejected"
            );
        }
    }

    #[test]
    fn verification_kind_parse_round_trip() {
        for kind in [VerificationKind::ConfirmEmail, VerificationKind::PasswordReset] {
            assert_eq!(VerificationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(VerificationKind::parse("mfa"), None);
    }
}
