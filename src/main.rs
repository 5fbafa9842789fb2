use anyhow::{Context, Result};
use skycast::AppContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize core
    skycast_core::init()?;

    let (config, _validation) = skycast_core::Config::load_validated()?;
    let app = AppContext::open(config)
        .await
        .context("Failed to start offline layer")?;
    app.start();

    tracing::info!("Skycast started");

    let status = app.offline_status();
    println!("Skycast - offline weather layer");
    println!("\nConfiguration:");
    println!("  Config directory: {}", app.config().config_dir.display());
    println!("\nStatus:");
    println!("  {}", serde_json::to_string(&status)?);
    println!("\nPress Ctrl+C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    // Graceful shutdown
    app.shutdown().await?;

    Ok(())
}
