// Catalog daemon entry point.
//
// Opens the fjall-backed catalog store, runs the stale-snapshot collection
// pass at startup and on an interval, and sweeps long-expired hosts. There
// is no request transport here; velad exists to own the store lifecycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vela_common::config::LivenessFlags;
use vela_common::HostAddr;
use vela_meta::backup::gc_stale_snapshots;
use vela_meta::hosts::{ListHostType, ListHostsProcessor};
use vela_meta::{LocalAdminClient, LockRegistry, Processor};
use vela_store::{CatalogStore, FjallEngine, StoreOptions};

#[derive(Debug, Parser)]
#[command(name = "velad", about = "vela catalog daemon")]
struct VeladArgs {
    /// Root directory for the catalog keyspace, checkpoints and exports.
    #[arg(long, default_value = "./velad_data")]
    data_dir: PathBuf,

    /// Service address of this catalog replica.
    #[arg(long, default_value = "127.0.0.1:9559")]
    listen: String,

    /// Optional JSON config file; values there override the flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 10)]
    heartbeat_interval_secs: u64,

    #[arg(long, default_value_t = 2)]
    expired_time_factor: u64,

    /// Hosts are removed after this long without a heartbeat.
    #[arg(long, default_value_t = 24 * 60 * 60)]
    removed_threshold_sec: u64,

    #[arg(long, default_value_t = 300)]
    snapshot_gc_interval_secs: u64,
}

/// Subset of the flags that may come from `--config`.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    heartbeat_interval_secs: Option<u64>,
    expired_time_factor: Option<u64>,
    removed_threshold_sec: Option<u64>,
    snapshot_gc_interval_secs: Option<u64>,
}

fn load_file_config(path: &PathBuf) -> anyhow::Result<FileConfig> {
    let raw = std::fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    serde_json::from_slice(&raw).context("parse config json")
}

fn parse_listen(raw: &str) -> anyhow::Result<HostAddr> {
    let (host, port) = raw
        .rsplit_once(':')
        .with_context(|| format!("malformed listen address '{raw}'"))?;
    Ok(HostAddr::new(host, port.parse::<u16>()?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = VeladArgs::parse();
    if let Some(path) = &args.config {
        let file = load_file_config(path)?;
        if let Some(v) = file.heartbeat_interval_secs {
            args.heartbeat_interval_secs = v;
        }
        if let Some(v) = file.expired_time_factor {
            args.expired_time_factor = v;
        }
        if let Some(v) = file.removed_threshold_sec {
            args.removed_threshold_sec = v;
        }
        if let Some(v) = file.snapshot_gc_interval_secs {
            args.snapshot_gc_interval_secs = v;
        }
    }

    let flags = LivenessFlags {
        heartbeat_interval_secs: args.heartbeat_interval_secs,
        expired_time_factor: args.expired_time_factor,
        removed_threshold_sec: args.removed_threshold_sec,
    };
    let local_host = parse_listen(&args.listen)?;
    info!(listen = %local_host, data_dir = %args.data_dir.display(), "starting velad");

    let engine = FjallEngine::open_at(&args.data_dir.join("catalog"))
        .context("open catalog keyspace")?;
    let raft_peer = HostAddr::new(local_host.host.clone(), local_host.port + 1);
    let store = Arc::new(CatalogStore::new(
        Arc::new(engine),
        StoreOptions {
            local_host,
            raft_peers: vec![raft_peer],
            data_dir: args.data_dir.clone(),
        },
    ));
    let locks = Arc::new(LockRegistry::new());
    let proc = Processor::new(store.clone(), locks, flags);
    let client = LocalAdminClient::new(store.clone());

    // Crash recovery: collect snapshot records that never reached VALID.
    match gc_stale_snapshots(&proc, &client).await {
        Ok(0) => {}
        Ok(collected) => info!(collected, "collected stale snapshots at startup"),
        Err(code) => error!(code = %code, "startup snapshot gc failed"),
    }

    let mut gc_ticker =
        tokio::time::interval(Duration::from_secs(args.snapshot_gc_interval_secs.max(1)));
    gc_ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = gc_ticker.tick() => {
                match gc_stale_snapshots(&proc, &client).await {
                    Ok(0) => {}
                    Ok(collected) => info!(collected, "collected stale snapshots"),
                    Err(code) => warn!(code = %code, "snapshot gc failed"),
                }
                // Listing storage hosts queues long-expired ones for removal.
                if let Err(code) = ListHostsProcessor::new(&proc)
                    .process(ListHostType::Storage)
                    .await
                {
                    warn!(code = %code, "host sweep failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    store.flush().map_err(|err| anyhow::anyhow!("final flush failed: {err}"))?;
    Ok(())
}
