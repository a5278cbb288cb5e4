use crate::cli::actions::{server, Action};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let frontend_url = matches
        .get_one::<String>("frontend-url")
        .cloned()
        .context("missing required argument: --frontend-url")?;
    let access_token_secret = matches
        .get_one::<String>("access-token-secret")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --access-token-secret")?;
    let verification_token_secret = matches
        .get_one::<String>("verification-token-secret")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --verification-token-secret")?;

    Ok(Action::Server(server::Args {
        port,
        dsn,
        frontend_url,
        access_token_secret,
        verification_token_secret,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn handler_builds_server_action() -> Result<()> {
        temp_env::with_vars(
            [
                ("PARLEY_PORT", None::<&str>),
                ("PARLEY_DSN", None),
                ("PARLEY_FRONTEND_URL", None),
                ("PARLEY_ACCESS_TOKEN_SECRET", None),
                ("PARLEY_VERIFICATION_TOKEN_SECRET", None),
            ],
            || {
                let matches = commands::new().get_matches_from(vec![
                    "parley",
                    "--port",
                    "9000",
                    "--dsn",
                    "postgres://localhost/parley",
                    "--frontend-url",
                    "https://chat.parley.dev",
                    "--access-token-secret",
                    "a",
                    "--verification-token-secret",
                    "b",
                ]);
                let Action::Server(args) = handler(&matches)?;
                assert_eq!(args.port, 9000);
                assert_eq!(args.dsn, "postgres://localhost/parley");
                assert_eq!(args.frontend_url, "https://chat.parley.dev");
                Ok(())
            },
        )
    }
}
