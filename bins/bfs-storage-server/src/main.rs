use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bfs_config::ConfigManager;
use bfs_logging::init_logging;
use bfs_storage_node::{BlockStore, NodeServer, StorageNodeConfig, StorageNodeService};
use bfs_types::NodeId;
use clap::Parser;

/// Block storage node: serves STORE/FETCH/DELETE/HEARTBEAT over TCP.
#[derive(Parser, Debug)]
#[command(name = "bfs-storage-server", version, about)]
struct Args {
    /// Path to configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `node_id`.
    #[arg(long)]
    node_id: Option<u32>,

    /// Override `listen`.
    #[arg(long)]
    listen: Option<String>,

    /// Override `capacity_bytes`.
    #[arg(long)]
    capacity_bytes: Option<u64>,

    /// Print the default configuration as TOML and exit.
    #[arg(long)]
    dump_default_config: bool,
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to register SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for CTRL+C")?;
            tracing::info!("Received CTRL+C");
        }
        _ = sigterm.recv() => { tracing::info!("Received SIGTERM"); }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        print!("{}", toml::to_string_pretty(&StorageNodeConfig::default())?);
        return Ok(());
    }

    let manager = match &args.config {
        Some(path) => ConfigManager::<StorageNodeConfig>::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigManager::new(StorageNodeConfig::default()),
    };
    let mut config = manager.snapshot();
    if let Some(id) = args.node_id {
        config.node_id = NodeId(id);
    }
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(capacity) = args.capacity_bytes {
        config.capacity_bytes = capacity;
    }
    manager.update(config).context("invalid configuration")?;
    let config = manager.snapshot();

    let _log_guard = init_logging(&config.log)?;

    let store = Arc::new(BlockStore::new(config.capacity_bytes));
    let mut server = NodeServer::new(StorageNodeService::new(config.node_id, store));
    let addr = server
        .start(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    tracing::info!(
        node_id = %config.node_id,
        addr = %addr,
        capacity_bytes = config.capacity_bytes,
        "storage server started"
    );

    wait_for_shutdown_signal().await?;
    server.stop().await;
    tracing::info!(
        blocks = server.service().store().len(),
        "storage server stopped"
    );
    Ok(())
}
