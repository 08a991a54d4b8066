//! proxy-warden
//!
//! # Architecture Overview
//!
//! ```text
//!   operator / CLI / dashboard
//!        │ HTTP /api/*           │ WS /ws/logs
//!        ▼                       ▼
//!  ┌──────────────┐        ┌───────────┐
//!  │ admin + http │───────▶│ event hub │◀──────────── engine stdout/stderr
//!  └──────┬───────┘        └───────────┘                      ▲
//!         ▼                      ▲                            │
//!  ┌──────────────┐   ┌──────────┴─┐   ┌────────────┐   ┌─────┴──────┐
//!  │ control plane│──▶│ reconciler │──▶│ engine API │   │ supervisor │──▶ engine process
//!  └──────┬───────┘   └────────────┘   └────────────┘   └────────────┘
//!         ▼
//!  ┌──────────────┐
//!  │ config store │──▶ <data_dir>/config.json
//!  └──────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use proxy_warden::config::loader::load_config;
use proxy_warden::lifecycle::signals::wait_for_termination;
use proxy_warden::observability::{logging, metrics};
use proxy_warden::Warden;

#[derive(Parser)]
#[command(name = "proxy-warden", version, about = "Control plane for a supervised proxy engine")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when it is absent.
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config, true)?;
    logging::init(&config.observability.log_level);

    tracing::info!("proxy-warden v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        engine_api = %config.engine.api_url,
        data_dir = %config.store.data_dir,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let warden = Warden::build(&config).await?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    warden.run(listener, wait_for_termination()).await?;
    Ok(())
}
