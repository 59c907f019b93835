//! Bedrock validator node.
//!
//! # Usage
//!
//! ```bash
//! # Start with a configuration file and signing key
//! bedrock-validator --config validator.toml --key validator.key
//!
//! # Override the data directory and gateway address
//! bedrock-validator --config validator.toml --key validator.key \
//!     --data-dir /var/lib/bedrock --rpc-addr 0.0.0.0:9080
//! ```
//!
//! The signing key file holds a 32-byte Ed25519 seed as 64 hex characters.
//! See `NodeConfig` for the TOML schema.
//!
//! The peer-to-peer transport is an external collaborator: inbound envelopes
//! are fed through `NodeHandle::submit_inbound`, and outbound envelopes are
//! drained from the transport queue by whatever gossip layer the deployment
//! wires in.

use anyhow::{bail, Context, Result};
use bedrock_consensus::Engine;
use bedrock_core::EmptyPayloads;
use bedrock_node::rpc::{Gateway, GatewayConfig, GatewayState, RateLimiter};
use bedrock_node::telemetry::{init_telemetry, TelemetryConfig};
use bedrock_node::{
    BlockStore, ChannelTransport, ConsensusStore, FileConsensusStore, InMemoryBlockStore,
    NodeConfig, NodeMetrics, NodeRunner,
};
use bedrock_types::KeyPair;
use clap::Parser;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bedrock validator node.
///
/// Runs a replica participating in BFT consensus.
#[derive(Parser, Debug)]
#[command(name = "bedrock-validator")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Path to the validator signing key (64 hex chars)
    #[arg(long)]
    key: PathBuf,

    /// Data directory for consensus state
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Gateway listen address (overrides config)
    #[arg(long)]
    rpc_addr: Option<SocketAddr>,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, default_value = "info,bedrock=debug")]
    log_level: String,
}

fn load_keypair(path: &PathBuf) -> Result<KeyPair> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading key file {}", path.display()))?;
    let bytes = hex::decode(text.trim()).context("key file is not valid hex")?;
    let seed: [u8; 32] = match bytes.try_into() {
        Ok(seed) => seed,
        Err(_) => bail!("key file must contain exactly 32 bytes of hex"),
    };
    Ok(KeyPair::from_seed(&seed))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(&TelemetryConfig {
        log_filter: cli.log_level.clone(),
    })
    .context("initializing telemetry")?;

    let config_text = fs::read_to_string(&cli.config)
        .with_context(|| format!("reading config {}", cli.config.display()))?;
    let config: NodeConfig = toml::from_str(&config_text).context("parsing config")?;

    let signing_key = load_keypair(&cli.key)?;
    let validators = Arc::new(config.validator_set().context("building validator set")?);
    if validators.get_by_address(&signing_key.address()).is_none() {
        bail!(
            "our address {} is not in the configured validator set",
            signing_key.address()
        );
    }

    info!(
        address = %signing_key.address(),
        validators = validators.len(),
        chain_id = %config.chain_id,
        "starting bedrock validator"
    );

    // Crash-safety state: locked QC and our own votes survive restarts.
    fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("creating data dir {}", cli.data_dir.display()))?;
    let consensus_store = Arc::new(
        FileConsensusStore::open(cli.data_dir.join("consensus.state"))
            .context("opening consensus store")?,
    );
    let block_store = Arc::new(InMemoryBlockStore::new());

    let mut recovered = consensus_store.load().context("loading consensus state")?;
    if let Some((height, hash)) = block_store.latest().context("reading block store")? {
        recovered.committed_height = height;
        recovered.committed_hash = Some(hash);
    }
    if recovered.voted.is_some() || recovered.locked_qc.is_some() {
        info!(
            committed_height = recovered.committed_height,
            has_lock = recovered.locked_qc.is_some(),
            "recovered consensus state"
        );
    }

    let engine = Engine::new(
        config.consensus_config(),
        signing_key,
        validators,
        Box::new(EmptyPayloads),
        recovered,
    );

    let shutdown = CancellationToken::new();
    let metrics = Arc::new(NodeMetrics::new());
    let (transport, mut outbound) = ChannelTransport::new();

    // `_handle` is the inbound path: a deployment's transport adapter clones
    // it and feeds received envelopes through `submit_inbound`.
    let (runner, _handle) = NodeRunner::new(
        engine,
        Arc::new(transport),
        block_store.clone(),
        consensus_store,
        metrics.clone(),
        shutdown.clone(),
    );
    let status = runner.status();

    // Standalone mode: without a wired gossip layer, outbound envelopes are
    // drained and dropped.
    let outbound_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = outbound_shutdown.cancelled() => return,
                Some(data) = outbound.recv() => {
                    debug!(len = data.len(), "no transport wired, dropping outbound envelope");
                }
                else => return,
            }
        }
    });

    // Gateway.
    let ready = Arc::new(AtomicBool::new(false));
    let gateway_state = GatewayState {
        ready: ready.clone(),
        status: status.clone(),
        block_store,
        metrics,
        limiter: Arc::new(RateLimiter::new(
            config.rate_limit.rate,
            config.rate_limit_window(),
        )),
        start_time: Instant::now(),
    };
    let gateway_config = GatewayConfig {
        listen_addr: cli.rpc_addr.unwrap_or(config.rpc_listen),
    };
    let gateway = Gateway::new(gateway_config, gateway_state)
        .start(shutdown.clone())
        .await
        .context("starting gateway")?;

    let runner_task = tokio::spawn(runner.run());
    ready.store(true, Ordering::SeqCst);
    info!("node running; ctrl-c to stop");

    signal::ctrl_c().await.context("waiting for ctrl-c")?;
    warn!("interrupt received, shutting down");
    shutdown.cancel();

    let _ = runner_task.await;
    let _ = gateway.join().await;
    info!("shutdown complete");
    Ok(())
}
