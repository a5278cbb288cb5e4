//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::token::VerificationStage;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyOtpRequest {
    pub otp: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

/// Response that also tells the client which flow step comes next.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct StageResponse {
    pub message: String,
    pub stage: VerificationStage,
}

/// Response carrying a bearer access token in the body (never a cookie).
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub message: String,
    pub access_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn signup_request_round_trips() -> Result<()> {
        let request = SignupRequest {
            name: "Ann".to_string(),
            email: "ann@x.com".to_string(),
            password: "Aa1!aaaa".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let decoded: SignupRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.email, "ann@x.com");
        Ok(())
    }

    #[test]
    fn stage_response_uses_snake_case_stage() -> Result<()> {
        let response = StageResponse {
            message: "ok".to_string(),
            stage: VerificationStage::CodeVerification,
        };
        let value = serde_json::to_value(&response)?;
        assert_eq!(
            value.get("stage").and_then(serde_json::Value::as_str),
            Some("code_verification")
        );
        Ok(())
    }
}
