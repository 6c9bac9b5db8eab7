use anyhow::Context;
use clap::Parser;
use tracing::info;

use bookshelf::config::Config;
use bookshelf::{app, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    config.validate().context("invalid configuration")?;
    logging::init(config.log_format)?;

    app::serve(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("ctrl-c received");
    })
    .await
    .context("server failed")?;

    Ok(())
}
