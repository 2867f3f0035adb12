use anyhow::Result;
use axum::Router;
use clap::Parser;
use server::{build_app, ServerConfig, StoreKind};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Artifact directory written by the importer
    #[arg(long, env = "BOOKREC_DATA", default_value = "./data")]
    data: PathBuf,
    /// Catalog backend
    #[arg(long, env = "BOOKREC_STORE", value_enum, default_value_t = StoreKind::Memory)]
    store: StoreKind,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, env = "PORT", default_value_t = 10000)]
    port: u16,
    /// Upper bound for a single catalog access, in milliseconds
    #[arg(long, default_value_t = 2000)]
    store_timeout_ms: u64,
    /// Answer errors with 400/404/500 instead of 200
    #[arg(long, default_value_t = false)]
    strict_status: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = ServerConfig {
        data_dir: args.data,
        store: args.store,
        store_timeout: Duration::from_millis(args.store_timeout_ms),
        strict_status: args.strict_status,
    };
    let app: Router = build_app(config)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
