use std::time::Duration;

use clap::Parser;
use research_mcp::{
    catalog::{self, research_registry, CatalogConfig},
    Result, Server, ServerConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Research assistant MCP server", long_about = None)]
struct Args {
    /// Listen for TCP connections on this address instead of serving stdio
    #[arg(long, env = "RESEARCH_SERVER_TCP")]
    tcp: Option<String>,

    /// Simulated work per item in process_items, in milliseconds
    #[arg(long, default_value = "100")]
    item_delay_ms: u64,

    /// strftime pattern for get_current_time
    #[arg(long, default_value = catalog::TIME_FORMAT)]
    time_format: String,

    /// How long tools wait for a sampling answer, in seconds
    #[arg(long, default_value = "60")]
    sampling_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the protocol when serving stdio.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let registry = research_registry(
        CatalogConfig::default()
            .with_item_delay(Duration::from_millis(args.item_delay_ms))
            .with_time_format(args.time_format),
    )?;
    let server = Server::new("research-server", env!("CARGO_PKG_VERSION"), registry)
        .with_instructions("Demo research server: echo, time, item processing, document summaries and sentiment analysis.")
        .with_config(
            ServerConfig::default()
                .with_sampling_timeout(Duration::from_secs(args.sampling_timeout_secs)),
        );

    match args.tcp {
        Some(addr) => {
            info!("Serving on tcp://{}", addr);
            server.serve_tcp(addr).await
        }
        None => {
            info!("Serving on stdio");
            server.serve_stdio().await
        }
    }
}
