//! Meta server binary

use clap::{Parser, Subcommand};
use regcoord::common::{duration_millis, parse_duration, Config, StoreBackend};
use regcoord::MetaServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "regcoord-meta")]
#[command(about = "regcoord meta server: leader election, leases and provide data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start meta server
    Serve {
        /// Node ID, used as lock owner
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Data center whose lock row this node competes for
        #[arg(long)]
        data_center: Option<String>,

        /// RocksDB directory; `memory` for a process-local store
        #[arg(long)]
        db: Option<String>,

        /// Lock lease, e.g. `15s`
        #[arg(long)]
        lock_duration: Option<String>,

        /// Base URL of the meta node serving provide data
        #[arg(long)]
        authority: Option<String>,

        /// Never compete for leadership
        #[arg(long)]
        observer: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            data_center,
            db,
            lock_duration,
            authority,
            observer,
        } => {
            // File and environment first, CLI flags win; MetaServer::new
            // validates the merged result.
            let mut config = Config::load()?;
            if let Some(id) = id {
                config.node_id = id;
            }
            if let Some(bind) = bind {
                config.meta.bind_addr = bind;
            }
            if let Some(dc) = data_center {
                config.meta.data_center = dc;
            }
            if let Some(db) = db {
                config.meta.store = if db == "memory" {
                    StoreBackend::Memory
                } else {
                    StoreBackend::Rocksdb(PathBuf::from(db))
                };
            }
            if let Some(d) = lock_duration {
                config.meta.lock_duration_ms = duration_millis(parse_duration(&d)?)?;
            }
            if authority.is_some() {
                config.fetch.authority_url = authority;
            }
            if observer {
                config.meta.observer = true;
            }

            let server = MetaServer::new(config)?;
            server.serve().await?;
        }
    }

    Ok(())
}
