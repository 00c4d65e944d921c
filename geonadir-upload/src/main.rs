use anyhow::Result;
use clap::Parser;
use geonadir_upload::cli::{run, Cli};
use tracing::Level;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenv::dotenv().ok();

    let level = match std::env::var("DEPLOYMENT_ENV").as_deref() {
        Err(_) | Ok("prod") | Ok("production") => Level::INFO,
        Ok(_) => Level::DEBUG,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    let result = run(cli).await;
    match &result {
        Ok(_) => tracing::info!("CLI completed successfully"),
        Err(e) => tracing::error!(error = %e, "CLI exited with error"),
    }
    result
}
