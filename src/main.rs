use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use selftune::config::ServerConfig;
use selftune::mcp;
use selftune::scheduler::AutoOptimizeScheduler;
use selftune::tools::ToolContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing - logs to stderr (stdout is the wire)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "selftune=debug,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting selftune MCP server v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(ServerConfig::load()?);
    let ctx = Arc::new(ToolContext::new(config));

    // Background self-optimization: startup kick-off plus a recurring
    // timer, with its own circuit breaker.
    let scheduler = Arc::new(AutoOptimizeScheduler::new(ctx.clone()));
    scheduler.spawn();
    tracing::info!("Auto-optimization scheduler running");

    let server = mcp::Server::new(ctx);
    mcp::run_stdio(server).await?;

    Ok(())
}
