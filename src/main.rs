use ai_gateway::config::Config;
use ai_gateway::server::Server;
use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use validator::Validate;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::parse();
    config.validate().context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("ai_gateway={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ai-gateway");
    tracing::info!(
        "Configuration: bind_addr={}, store={}, upstream={}, rate_limit={}/{}ms ({:?}), cache_ttl={}ms",
        config.bind_addr,
        if config.uses_redis() { "redis" } else { "memory" },
        config.upstream_base_url,
        config.rate_limit_max_requests,
        config.rate_limit_window_ms,
        config.rate_limit_window_mode,
        config.cache_ttl_ms
    );

    let server = Server::new(config)
        .await
        .context("Failed to create server")?;

    server.run().await.context("Server error")?;

    Ok(())
}
