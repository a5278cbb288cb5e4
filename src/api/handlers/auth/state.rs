//! Auth state and configuration.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use crate::api::email::CodeSender;

use super::rate_limit::RateLimiter;
use super::storage::CredentialStore;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_CODE_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_SESSION_CAP: i64 = 3;

#[derive(Clone)]
pub struct AuthConfig {
    frontend_base_url: String,
    access_token_secret: SecretString,
    verification_token_secret: SecretString,
    access_token_ttl_seconds: i64,
    verification_token_ttl_seconds: i64,
    code_ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    refresh_token_ttl_seconds: i64,
    session_cap: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(
        frontend_base_url: String,
        access_token_secret: SecretString,
        verification_token_secret: SecretString,
    ) -> Self {
        Self {
            frontend_base_url,
            access_token_secret,
            verification_token_secret,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            verification_token_ttl_seconds: DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS,
            code_ttl_seconds: DEFAULT_CODE_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            session_cap: DEFAULT_SESSION_CAP,
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verification_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_cap(mut self, cap: i64) -> Self {
        self.session_cap = cap;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(super) fn access_token_secret(&self) -> &[u8] {
        self.access_token_secret.expose_secret().as_bytes()
    }

    pub(super) fn verification_token_secret(&self) -> &[u8] {
        self.verification_token_secret.expose_secret().as_bytes()
    }

    pub(super) fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    pub(super) fn verification_token_ttl_seconds(&self) -> i64 {
        self.verification_token_ttl_seconds
    }

    pub(super) fn code_ttl_seconds(&self) -> i64 {
        self.code_ttl_seconds
    }

    pub(super) fn resend_cooldown_seconds(&self) -> i64 {
        self.resend_cooldown_seconds
    }

    pub(super) fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    pub(super) fn session_cap(&self) -> i64 {
        self.session_cap
    }

    /// Cookies are only marked `Secure` when the frontend is served over
    /// HTTPS, so local development keeps working.
    pub(super) fn cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("frontend_base_url", &self.frontend_base_url)
            .field("access_token_secret", &"***")
            .field("verification_token_secret", &"***")
            .field("access_token_ttl_seconds", &self.access_token_ttl_seconds)
            .field(
                "verification_token_ttl_seconds",
                &self.verification_token_ttl_seconds,
            )
            .field("code_ttl_seconds", &self.code_ttl_seconds)
            .field("resend_cooldown_seconds", &self.resend_cooldown_seconds)
            .field("refresh_token_ttl_seconds", &self.refresh_token_ttl_seconds)
            .field("session_cap", &self.session_cap)
            .finish()
    }
}

pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
    code_sender: Arc<dyn CodeSender>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        code_sender: Arc<dyn CodeSender>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            store,
            code_sender,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(super) fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    pub(super) fn code_sender(&self) -> &dyn CodeSender {
        self.code_sender.as_ref()
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new(
            "https://parley.dev".to_string(),
            SecretString::from("access-secret"),
            SecretString::from("verification-secret"),
        )
    }

    #[test]
    fn defaults_and_overrides() {
        let config = config();
        assert_eq!(
            config.access_token_ttl_seconds(),
            DEFAULT_ACCESS_TOKEN_TTL_SECONDS
        );
        assert_eq!(config.code_ttl_seconds(), DEFAULT_CODE_TTL_SECONDS);
        assert_eq!(
            config.resend_cooldown_seconds(),
            DEFAULT_RESEND_COOLDOWN_SECONDS
        );
        assert_eq!(config.session_cap(), DEFAULT_SESSION_CAP);

        let config = config
            .with_access_token_ttl_seconds(60)
            .with_verification_token_ttl_seconds(120)
            .with_code_ttl_seconds(300)
            .with_resend_cooldown_seconds(5)
            .with_refresh_token_ttl_seconds(3600)
            .with_session_cap(5);
        assert_eq!(config.access_token_ttl_seconds(), 60);
        assert_eq!(config.verification_token_ttl_seconds(), 120);
        assert_eq!(config.code_ttl_seconds(), 300);
        assert_eq!(config.resend_cooldown_seconds(), 5);
        assert_eq!(config.refresh_token_ttl_seconds(), 3600);
        assert_eq!(config.session_cap(), 5);
    }

    #[test]
    fn cookie_secure_follows_frontend_scheme() {
        assert!(config().cookie_secure());
        let local = AuthConfig::new(
            "http://localhost:5173".to_string(),
            SecretString::from("a"),
            SecretString::from("b"),
        );
        assert!(!local.cookie_secure());
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("access-secret"));
        assert!(rendered.contains("***"));
    }
}
