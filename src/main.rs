//! Link proxy
//!
//! Serves objects from local directories and remote origins behind one HTTP
//! endpoint.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server ──▶ storage::MountTable ──▶ Link + FileObject
//!                                                                  │
//!                                       proxy::upgrade (optional) ◀┘
//!                                                │
//!                                                ▼
//!                                       proxy::Dispatcher
//!          ┌──────────────┬──────────────┬──────┴───────┬──────────────┐
//!          ▼              ▼              ▼              ▼              ▼
//!     local handle   range source   parallel parts   passthrough    markdown
//!          └──────┬───────┴──────────────┘              │          (render +
//!                 ▼                                     │           sanitize)
//!          http::serve (Range, conditionals)            │
//!                 │                                     │
//!     Client Response ◀──── security::rate_limit ◀──────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use link_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use link_proxy::lifecycle::startup;

#[derive(Debug, Parser)]
#[command(name = "link-proxy", version, about = "Content-delivery link proxy")]
struct Cli {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    startup::run(config).await
}
