//! Remedy RPC server - HTTP/JSON front end for the step engine.

mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use remedy::io::config::load_config;
use remedy::io::model::CommandModel;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "remedy-rpc")]
#[command(about = "HTTP/JSON server for agentic remediation steps")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3002")]
    port: u16,

    /// Remedy config file (missing file means defaults)
    #[arg(long, default_value = ".remedy/config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("remedy_rpc=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = load_config(&args.config)?;
    info!(config = %args.config.display(), model = ?cfg.model.command, "starting remedy-rpc");

    let model = CommandModel::new(cfg.model.command.clone(), cfg.model.output_limit_bytes);
    let state = AppState::new(Arc::new(model), &cfg);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::api_router())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
