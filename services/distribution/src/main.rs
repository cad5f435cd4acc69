//! Registry server
//!
//! Run with: cargo run -p distribution --features cli -- --config registry.toml

use std::net::SocketAddr;

use camino::Utf8PathBuf;
use clap::Parser;
use distribution::{RegistryBuilder, RegistryConfig};
use eyre::WrapErr as _;
use tracing_subscriber::EnvFilter;

/// Serve the registry API
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Utf8PathBuf,

    /// Listen address, overriding the configuration
    #[arg(long)]
    addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = RegistryConfig::load(&args.config)?;
    let addr = args.addr.unwrap_or(config.http.addr);

    let app = RegistryBuilder::from_config(config)
        .await
        .wrap_err("configuring storage")?
        .build()?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    tracing::info!("registry listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
