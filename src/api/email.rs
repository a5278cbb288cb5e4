//! One-time-code delivery abstraction.
//!
//! The auth flows hand the raw code to a `CodeSender` and never see the
//! transport. The default sender for local development logs the code
//! instead of sending real email; production wiring can implement the
//! trait over SMTP or a delivery API without touching the flows.

use anyhow::Result;
use tracing::info;

use crate::token::VerificationKind;

/// Delivery hook for one-time codes.
pub trait CodeSender: Send + Sync {
    /// Deliver a code or return an error; failures are logged by the
    /// caller and never leak into the client response.
    fn send_code(&self, email: &str, code: &str, kind: VerificationKind) -> Result<()>;
}

/// Local dev sender that logs the code instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogCodeSender;

impl CodeSender for LogCodeSender {
    fn send_code(&self, email: &str, code: &str, kind: VerificationKind) -> Result<()> {
        info!(
            to_email = %email,
            kind = kind.as_str(),
            otp = %code,
            "code delivery stub"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sender_always_succeeds() {
        let sender = LogCodeSender;
        assert!(sender
            .send_code("ann@x.com", "123456", VerificationKind::ConfirmEmail)
            .is_ok());
    }
}
