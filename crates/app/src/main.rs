//! Santa server - Secret Santa room service
//!
//! Serves rooms and draws over TCP, backed by SQLite or an in-memory store.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use santa_net::Server;

mod state;

#[derive(Debug, Parser)]
#[command(name = "santa-server", version, about = "Secret Santa room service")]
pub struct Args {
    /// TOML config file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(long, value_name = "N")]
    pub port: Option<u16>,

    /// Keep rooms in memory instead of SQLite
    #[arg(long)]
    pub memory: bool,
}

fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting santa-server");

    let state = match state::ServiceState::new(&args) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to initialize service: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(serve(state)) {
        tracing::error!("Server failed: {}", e);
        std::process::exit(1);
    }
}

async fn serve(state: state::ServiceState) -> santa_net::Result<()> {
    let addr = state.config.server.socket_addr();
    let policy = state.config.transactions.retry_policy();

    let server = Server::start(addr, state.store, policy).await?;
    tracing::info!(
        addr = %server.addr(),
        link = %santa_net::RoomLink::new(server.addr(), "<room-id>"),
        "Listening"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!(connections = server.connection_count().await, "Shutting down");
    server.shutdown();

    Ok(())
}
