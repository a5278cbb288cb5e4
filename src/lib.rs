//! # Parley (chat application backend)
//!
//! `parley` is the backend for the Parley chat application. This crate
//! carries its engineering core: account creation with deduplication, a
//! one-time-code verification protocol shared by email confirmation and
//! password reset, and refresh-token rotation with theft detection and a
//! per-user session cap.
//!
//! ## Authentication
//!
//! Passwords and one-time codes are Argon2id-hashed; refresh tokens are
//! random 256-bit values stored only as SHA-256 hashes. Each refresh
//! token is good for exactly one rotation — replaying a consumed token is
//! treated as theft and revokes every session of the account.
//!
//! ## Verification flows
//!
//! Email confirmation and password reset share one OTP mechanism. The
//! flow state (kind, stage, code-verified flag) travels in a signed,
//! short-lived `verification_token` cookie, so multi-step progress needs
//! no server-side session and cannot be forged or skipped client-side.
//!
//! Chat rooms, messaging, and real-time delivery live in their own
//! services and talk to this crate only through the issued tokens.

pub mod api;
pub mod cli;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
