//! Live ingestion ("frontfill") of newly arrived blocks for one network.
//!
//! Each task fetches one block's logs for the network's contract addresses, writes them
//! to the [CacheStore] and hands them to the [HandlerQueue]. The cache store and handler
//! queue are supplied by the caller; this module only threads them through.
//!
//! Children announced by a factory log are remembered per queue and included in every
//! later query. A child created in the block being processed has its logs for that same
//! block fetched in a second request.

use crate::config::RetryConfig;
use crate::factory::FactoryCriteria;
use crate::network::Network;
use crate::provider::LogQuery;
use crate::queue::PausableQueue;
use alloy::primitives::Address;
use alloy::rpc::types::Log;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::time::sleep;

/// Persisted log cache, keyed by chain and block range.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn insert_logs(&self, chain_id: u64, logs: &[Log]) -> Result<()>;

    /// Records that `[start_block, end_block]` is cached for `addresses` (`None` = any).
    async fn insert_cached_range(
        &self,
        chain_id: u64,
        addresses: Option<&[Address]>,
        start_block: u64,
        end_block: u64,
    ) -> Result<()>;
}

/// Downstream event-handler dispatch.
#[async_trait]
pub trait HandlerQueue: Send + Sync {
    async fn dispatch(&self, batch: LiveLogBatch) -> Result<()>;
}

/// Logs of one live block.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveLogBatch {
    pub network: String,
    pub chain_id: u64,
    pub block_number: u64,
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFrontfillTask {
    pub block_number: u64,
}

/// Everything a live queue needs.
pub struct BlockFrontfillContext {
    pub cache_store: Arc<dyn CacheStore>,
    pub network: Network,
    /// `None` fetches logs from every address.
    pub contract_addresses: Option<Vec<Address>>,
    /// Factories whose children are followed.
    pub factories: Vec<FactoryCriteria>,
    pub handler_queue: Arc<dyn HandlerQueue>,
    pub retry: RetryConfig,
}

pub type BlockFrontfillQueue = PausableQueue<BlockFrontfillTask>;

/// Creates a running (unpaused) frontfill queue for one network.
pub fn create_block_frontfill_queue(context: BlockFrontfillContext) -> BlockFrontfillQueue {
    let worker = Arc::new(FrontfillWorker {
        context,
        children: Mutex::new(Vec::new()),
    });
    PausableQueue::new(move |task: BlockFrontfillTask| {
        let worker = Arc::clone(&worker);
        async move { worker.process_with_retry(task).await }
    })
}

struct FrontfillWorker {
    context: BlockFrontfillContext,
    /// Factory children discovered so far, in discovery order.
    children: Mutex<Vec<Address>>,
}

impl FrontfillWorker {
    async fn process_with_retry(&self, task: BlockFrontfillTask) {
        let network = &self.context.network.name;
        let retry = &self.context.retry;
        let mut failures = 0u32;
        loop {
            match self.process_block(task.block_number).await {
                Ok(log_count) => {
                    tracing::debug!(network = %network, block_number = task.block_number, log_count, "live block processed");
                    return;
                }
                Err(e) => {
                    failures += 1;
                    if retry.exhausted(failures) {
                        tracing::error!(
                            network = %network,
                            block_number = task.block_number,
                            attempts = failures,
                            reason = %e,
                            "live block dropped"
                        );
                        return;
                    }
                    tracing::warn!(
                        network = %network,
                        block_number = task.block_number,
                        attempt = failures,
                        reason = %e,
                        "live block failed, retrying..."
                    );
                    sleep(retry.delay_after(failures)).await;
                }
            }
        }
    }

    /// Query addresses: the network's contracts plus known children. `None` = any emitter.
    fn addresses(&self) -> Option<Vec<Address>> {
        let mut addresses = self.context.contract_addresses.clone()?;
        let children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        for child in children.iter() {
            if !addresses.contains(child) {
                addresses.push(*child);
            }
        }
        Some(addresses)
    }

    /// Children announced in `logs` that are not known yet.
    fn new_children(&self, logs: &[Log]) -> Vec<Address> {
        let known = self.children.lock().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<Address> = Vec::new();
        for log in logs {
            let child = self.context.factories.iter().find_map(|f| {
                f.child_address(log.address(), log.topics(), &log.inner.data.data)
            });
            if let Some(child) = child {
                if !known.contains(&child) && !found.contains(&child) {
                    found.push(child);
                }
            }
        }
        found
    }

    async fn fetch_logs(&self, addresses: Option<Vec<Address>>, block_number: u64) -> Result<Vec<Log>> {
        let query = LogQuery {
            addresses,
            from_block: block_number,
            to_block: block_number,
        };
        self.context
            .network
            .provider
            .get_logs(&query)
            .await
            .with_context(|| format!("eth_getLogs block {block_number}"))
    }

    async fn process_block(&self, block_number: u64) -> Result<usize> {
        let context = &self.context;
        let network = &context.network;
        let mut addresses = self.addresses();
        let mut logs = self.fetch_logs(addresses.clone(), block_number).await?;

        let children = self.new_children(&logs);
        if !children.is_empty() {
            if let Some(addresses) = addresses.as_mut() {
                let mut child_logs = self.fetch_logs(Some(children.clone()), block_number).await?;
                logs.append(&mut child_logs);
                logs.sort_by_key(|l| l.log_index);
                addresses.extend(children.iter().copied());
            }
        }

        context
            .cache_store
            .insert_logs(network.chain_id, &logs)
            .await
            .context("cache logs")?;
        context
            .cache_store
            .insert_cached_range(network.chain_id, addresses.as_deref(), block_number, block_number)
            .await
            .context("cache range")?;

        let log_count = logs.len();
        context
            .handler_queue
            .dispatch(LiveLogBatch {
                network: network.name.clone(),
                chain_id: network.chain_id,
                block_number,
                logs,
            })
            .await
            .context("dispatch")?;

        if !children.is_empty() {
            tracing::info!(network = %network.name, block_number, count = children.len(), "following new factory children");
            self.children
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend(children);
        }
        Ok(log_count)
    }
}
