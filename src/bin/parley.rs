use anyhow::Result;
use parley::cli::start;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse arguments, initialize logging/telemetry, and get the action.
    let action = start()?;

    action.execute().await
}
