//! torrent-node entry point: loads the config file named on the command
//! line, wires storage, resolver, sources, workers and the query surface
//! together, and runs until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use torrent_node_api_server::NodeServerBuilder;
use torrent_node_config::types::ServersSource;
use torrent_node_config::NodeConfig;
use torrent_node_core::blockchain::BlockChain;
use torrent_node_core::cache::AllCaches;
use torrent_node_core::crypto::NodeKey;
use torrent_node_core::node_tests::TestNodes;
use torrent_node_core::p2p::Peers;
use torrent_node_core::source::{BlockSource, FileBlockSource, NetworkBlockSource};
use torrent_node_core::storage::Storage;
use torrent_node_core::sync::{Sync, SyncSettings};
use torrent_node_core::{NodeState, StopFlag};

const GIT_HASH: &str = match option_env!("GIT_HASH") {
    Some(hash) => hash,
    None => "unknown",
};

#[derive(Parser)]
#[command(name = "torrent-node", version, about = "Torrent-style blockchain indexing node")]
struct Cli {
    /// Path to the node config file.
    config: PathBuf,
}

/// Prefixes a scheme and appends the default port where the config omits
/// them.
fn normalize_server(server: &str, default_port: u16) -> String {
    let (scheme, rest) = match server.split_once("://") {
        Some((scheme, rest)) => (scheme.to_string(), rest.to_string()),
        None => ("http".to_string(), server.to_string()),
    };
    let rest = rest.trim_end_matches('/');
    if rest.contains(':') {
        format!("{scheme}://{rest}")
    } else {
        format!("{scheme}://{rest}:{default_port}")
    }
}

fn resolve_servers(config: &NodeConfig) -> anyhow::Result<Vec<String>> {
    let raw: Vec<String> = match &config.servers {
        ServersSource::List(list) => list.clone(),
        ServersSource::File { file } => {
            let contents = std::fs::read_to_string(file)
                .with_context(|| format!("cannot read servers file `{file}`"))?;
            let mut servers = Vec::new();
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let (first, second) = line
                    .split_once(',')
                    .with_context(|| format!("incorrect servers file line `{line}`"))?;
                for server in [first.trim(), second.trim()] {
                    if !server.is_empty() && !servers.iter().any(|known| known == server) {
                        servers.push(server.to_string());
                    }
                }
            }
            servers
        }
    };
    Ok(raw
        .iter()
        .map(|server| normalize_server(server, config.other_torrent_port))
        .collect())
}

fn load_node_key(sign_key: &str) -> anyhow::Result<Option<Arc<NodeKey>>> {
    if sign_key.is_empty() {
        return Ok(None);
    }
    let key_path = format!("./{sign_key}.raw.prv");
    let raw = std::fs::read_to_string(&key_path)
        .with_context(|| format!("file with private key not found: {key_path}"))?;
    let der = hex::decode(raw.trim()).context("private key file is not hex")?;
    let key = NodeKey::from_der(&der, sign_key).context("incorrect private key")?;
    Ok(Some(Arc::new(key)))
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    let modules = config.parsed_modules()?;
    tracing::info!(modules = %modules.to_bitset_string(), "modules");

    let (stop_handle, stop) = StopFlag::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            stop_handle.stop();
        }
    });

    let storage = Arc::new(Storage::open(&config.db)?);
    let blockchain = Arc::new(BlockChain::new());
    let caches = Arc::new(AllCaches::new(
        config.caches.max_count_elements_block_cache,
        config.caches.max_count_blocks_txs_cache,
    ));
    let node_key = load_node_key(&config.sign_key)?;

    let state = Arc::new(NodeState::new(
        Arc::clone(&storage),
        Arc::clone(&blockchain),
        Arc::clone(&caches),
        modules,
        node_key.clone(),
    ));

    let servers = resolve_servers(&config)?;
    let source: Box<dyn BlockSource> = if config.get_blocks_from_file {
        Box::new(FileBlockSource::new(
            Arc::clone(&storage),
            &config.path_to_folder,
            config.validate,
        ))
    } else {
        anyhow::ensure!(!servers.is_empty(), "no servers configured");
        let peers = Arc::new(Peers::new(
            servers.clone(),
            config.count_connections,
            stop.clone(),
        )?);
        Box::new(NetworkBlockSource::new(
            &config.path_to_folder,
            config.advanced_load_blocks,
            config.count_blocks_in_batch,
            config.compress_blocks,
            peers,
            modules.users(),
            config.validate,
            config.validate_sign,
        ))
    };

    let server = NodeServerBuilder::new(
        Arc::clone(&state),
        env!("CARGO_PKG_VERSION"),
        GIT_HASH,
    )
    .serve(
        SocketAddr::from(([0, 0, 0, 0], config.port)),
        stop.clone(),
    )
    .await?;

    if modules.node_test() {
        let tester = TestNodes::new(
            format!("127.0.0.1:{}", config.port),
            config.test_nodes_result_server.clone(),
            config.other_torrent_port,
            Arc::clone(&storage),
            node_key,
            stop.clone(),
        )?;
        tokio::spawn(tester.run());
    }

    let settings = SyncSettings {
        save_block_to_files: modules.block_raw() && !config.get_blocks_from_file,
        validate: config.validate,
    };
    let sync = Sync::new(Arc::clone(&state), source, settings, stop);
    sync.synchronize().await?;

    server.stopped().await;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), git_hash = GIT_HASH, "starting torrent-node");

    let config = NodeConfig::load(&cli.config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.count_threads.max(2))
        .enable_all()
        .build()
        .context("cannot build runtime")?;
    runtime.block_on(run(config))
}
