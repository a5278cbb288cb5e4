use crate::api;
use crate::api::handlers::auth::AuthConfig;
use anyhow::Result;
use secrecy::SecretString;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_url: String,
    pub access_token_secret: SecretString,
    pub verification_token_secret: SecretString,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    info!(
        port = args.port,
        frontend_url = %args.frontend_url,
        "starting server"
    );

    let auth_config = AuthConfig::new(
        args.frontend_url,
        args.access_token_secret,
        args.verification_token_secret,
    );

    api::new(args.port, args.dsn, auth_config).await
}
