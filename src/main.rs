// src/main.rs
use tracing_subscriber::EnvFilter;
use wanfed_vault::cli::run_cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    run_cli().await
}
