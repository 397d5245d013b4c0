//! Example: resolve sources from a config file and follow every network's head, printing
//! each live block's logs.
//!
//! Usage: cargo run -p tendril --example live_sync -- CONFIG.json
//!
//! Backfill is not part of this example, so queues are resumed right away.

use alloy::primitives::Address;
use alloy::rpc::types::Log;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tendril::{
    build_networks, build_sources, CacheStore, Config, HandlerQueue, LiveBlockOrchestrator,
    LiveLogBatch,
};
use tracing_subscriber::EnvFilter;

/// Discards everything; a real deployment persists logs and ranges.
struct NoopCache;

#[async_trait]
impl CacheStore for NoopCache {
    async fn insert_logs(&self, _chain_id: u64, _logs: &[Log]) -> Result<()> {
        Ok(())
    }

    async fn insert_cached_range(
        &self,
        _chain_id: u64,
        _addresses: Option<&[Address]>,
        _start_block: u64,
        _end_block: u64,
    ) -> Result<()> {
        Ok(())
    }
}

struct PrintHandler;

#[async_trait]
impl HandlerQueue for PrintHandler {
    async fn dispatch(&self, batch: LiveLogBatch) -> Result<()> {
        println!(
            "{} block={} logs={}",
            batch.network,
            batch.block_number,
            batch.logs.len()
        );
        for log in &batch.logs {
            println!(
                "  emitter=0x{} topic0={:?}",
                hex::encode(log.address()),
                log.topics().first()
            );
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tendril=info")),
        )
        .init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: live_sync CONFIG.json");
        std::process::exit(1);
    };
    let config = Config::load(&path)?;
    let sources = build_sources(&config).context("resolve sources")?;
    let networks = build_networks(&config).context("build networks")?;
    for source in &sources {
        tracing::info!(
            contract = %source.name,
            network = %source.network,
            start_block = source.start_block,
            factory = source.is_factory(),
            "source"
        );
    }

    let mut orchestrator = LiveBlockOrchestrator::new(config.live_sync.clone());
    let queues = orchestrator
        .build_live_block_queues(&sources, &networks, Arc::new(NoopCache), Arc::new(PrintHandler))
        .await?;
    for (network, block) in &queues.latest_block_number_by_network {
        println!("{network}: following from block {block}");
    }
    queues.resume_live_block_queues();

    tokio::signal::ctrl_c().await?;
    Ok(())
}
