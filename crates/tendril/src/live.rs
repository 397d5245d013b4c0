//! Live synchronization: one head lookup, one paused queue and one block listener per network.
//!
//! [LiveBlockOrchestrator::build_live_block_queues] is called at the start of every sync
//! cycle. It first detaches the previous cycle's listeners, then for each distinct network
//! referenced by the sources:
//!
//! 1. fetches the current head (concurrently across networks, retried within a network),
//! 2. creates a frontfill queue and pauses it,
//! 3. attaches a block listener that enqueues every block strictly above that head,
//!    filling any numbers the provider did not deliver individually.
//!
//! Each network attaches as soon as its own head is known. If another network's head
//! lookup fails, everything attached in the cycle is detached again.
//!
//! Nothing reaches the handler queue until the backfill side calls
//! [LiveBlockQueues::resume_live_block_queues]; the backlog then drains in arrival order.

use crate::config::{LiveSyncConfig, RetryConfig};
use crate::error::{ConfigError, SyncError};
use crate::factory::FactoryCriteria;
use crate::frontfill::{
    create_block_frontfill_queue, BlockFrontfillContext, BlockFrontfillQueue, BlockFrontfillTask,
    CacheStore, HandlerQueue,
};
use crate::network::Network;
use crate::provider::BlockListener;
use crate::sources::{Source, SourceCriteria};
use alloy::primitives::Address;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info};

/// Providers that currently carry this orchestrator's block listeners.
#[derive(Debug, Default)]
pub struct SynchronizationState {
    attached: Vec<Network>,
}

impl SynchronizationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of networks with an attached listener.
    pub fn attached_networks(&self) -> Vec<&str> {
        self.attached.iter().map(|n| n.name.as_str()).collect()
    }

    fn teardown(&mut self) {
        for network in self.attached.drain(..) {
            debug!(network = %network.name, "removing block listeners");
            network.provider.remove_all_listeners();
        }
    }
}

/// Live state of one network for the current cycle.
pub struct LiveNetworkStatus {
    pub network_name: String,
    pub latest_block_number: u64,
    pub live_block_request_queue: BlockFrontfillQueue,
}

/// Resumes every live queue of a cycle. Cheap to clone and hand to the backfill side.
#[derive(Clone)]
pub struct ResumeLiveBlockQueues {
    statuses: Arc<Vec<LiveNetworkStatus>>,
}

impl ResumeLiveBlockQueues {
    /// Resumes all queues; returns how many were resumed.
    pub fn resume(&self) -> usize {
        for status in self.statuses.iter() {
            info!(
                network = %status.network_name,
                backlog = status.live_block_request_queue.pending(),
                "resuming live block queue"
            );
            status.live_block_request_queue.resume();
        }
        self.statuses.len()
    }
}

/// Result of one orchestrator invocation.
pub struct LiveBlockQueues {
    pub latest_block_number_by_network: BTreeMap<String, u64>,
    resume: ResumeLiveBlockQueues,
}

impl LiveBlockQueues {
    pub fn resume_live_block_queues(&self) -> usize {
        self.resume.resume()
    }

    pub fn resume_handle(&self) -> ResumeLiveBlockQueues {
        self.resume.clone()
    }

    pub fn statuses(&self) -> &[LiveNetworkStatus] {
        &self.resume.statuses
    }
}

/// Owns the listener bookkeeping across sync cycles.
pub struct LiveBlockOrchestrator {
    config: LiveSyncConfig,
    state: SynchronizationState,
}

impl LiveBlockOrchestrator {
    pub fn new(config: LiveSyncConfig) -> Self {
        Self::with_state(config, SynchronizationState::new())
    }

    /// Continues from the state of a previous orchestrator.
    pub fn with_state(config: LiveSyncConfig, state: SynchronizationState) -> Self {
        Self { config, state }
    }

    pub fn state(&self) -> &SynchronizationState {
        &self.state
    }

    pub fn into_state(self) -> SynchronizationState {
        self.state
    }

    /// Starts a sync cycle. See the module docs.
    ///
    /// Fails with a [ConfigError] if a source names a network not in `networks`, and with
    /// [SyncError::HeadUnavailable] if a head lookup exhausts its retry budget; in both
    /// cases no listener stays attached.
    pub async fn build_live_block_queues(
        &mut self,
        sources: &[Source],
        networks: &[Network],
        cache_store: Arc<dyn CacheStore>,
        handler_queue: Arc<dyn HandlerQueue>,
    ) -> Result<LiveBlockQueues, SyncError> {
        self.state.teardown();

        let unique_networks = unique_networks(sources, networks)?;

        let frontfill_retry = RetryConfig {
            max_attempts: self.config.frontfill_max_attempts,
            ..self.config.head_request.clone()
        };
        let started = join_all(unique_networks.iter().map(|network| {
            start_network(
                network,
                sources,
                &self.config.head_request,
                &frontfill_retry,
                &cache_store,
                &handler_queue,
            )
        }))
        .await;

        let mut latest_block_number_by_network = BTreeMap::new();
        let mut statuses = Vec::with_capacity(unique_networks.len());
        let mut first_error = None;
        for (network, result) in unique_networks.into_iter().zip(started) {
            match result {
                Ok(status) => {
                    latest_block_number_by_network
                        .insert(status.network_name.clone(), status.latest_block_number);
                    statuses.push(status);
                    self.state.attached.push(network);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            self.state.teardown();
            return Err(e);
        }

        Ok(LiveBlockQueues {
            latest_block_number_by_network,
            resume: ResumeLiveBlockQueues {
                statuses: Arc::new(statuses),
            },
        })
    }
}

/// Fetches one network's head, then attaches its paused queue and block listener.
async fn start_network(
    network: &Network,
    sources: &[Source],
    head_request: &RetryConfig,
    frontfill_retry: &RetryConfig,
    cache_store: &Arc<dyn CacheStore>,
    handler_queue: &Arc<dyn HandlerQueue>,
) -> Result<LiveNetworkStatus, SyncError> {
    let latest_block_number = fetch_latest_block_number(network, head_request).await?;

    let queue = create_block_frontfill_queue(BlockFrontfillContext {
        cache_store: Arc::clone(cache_store),
        network: network.clone(),
        contract_addresses: contract_addresses(sources, &network.name),
        factories: factories(sources, &network.name),
        handler_queue: Arc::clone(handler_queue),
        retry: frontfill_retry.clone(),
    });
    // Hold blocks until backfill completes.
    queue.pause();

    network
        .provider
        .on_block(gap_filling_listener(queue.clone(), latest_block_number));
    debug!(network = %network.name, latest_block_number, "block listener attached");

    Ok(LiveNetworkStatus {
        network_name: network.name.clone(),
        latest_block_number,
        live_block_request_queue: queue,
    })
}

/// Enqueues every block after `latest_block_number` exactly once, including numbers the
/// provider skipped before its first delivery.
fn gap_filling_listener(queue: BlockFrontfillQueue, latest_block_number: u64) -> BlockListener {
    let last_enqueued = Mutex::new(latest_block_number);
    Arc::new(move |block_number| {
        let mut last = last_enqueued.lock().unwrap_or_else(|e| e.into_inner());
        if block_number <= *last {
            return;
        }
        for n in *last + 1..=block_number {
            queue.push(BlockFrontfillTask { block_number: n });
        }
        *last = block_number;
    })
}

/// Distinct networks referenced by `sources`, in first-reference order.
fn unique_networks(sources: &[Source], networks: &[Network]) -> Result<Vec<Network>, ConfigError> {
    let mut unique: Vec<Network> = Vec::new();
    for source in sources {
        if unique.iter().any(|n| n.name == source.network) {
            continue;
        }
        let network = networks
            .iter()
            .find(|n| n.name == source.network)
            .ok_or_else(|| ConfigError::UnknownSourceNetwork(source.network.clone()))?;
        unique.push(network.clone());
    }
    Ok(unique)
}

/// Factory criteria of the factory sources on `network`.
fn factories(sources: &[Source], network: &str) -> Vec<FactoryCriteria> {
    sources
        .iter()
        .filter(|s| s.network == network)
        .filter_map(|s| match &s.criteria {
            SourceCriteria::Factory(f) => Some(f.clone()),
            SourceCriteria::LogFilter(_) => None,
        })
        .collect()
}

/// Addresses of all sources on `network`; `None` if any of them matches every address.
fn contract_addresses(sources: &[Source], network: &str) -> Option<Vec<Address>> {
    let mut addresses: Vec<Address> = Vec::new();
    for source in sources.iter().filter(|s| s.network == network) {
        for address in source.contract_addresses()? {
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
    }
    Some(addresses)
}

async fn fetch_latest_block_number(network: &Network, retry: &RetryConfig) -> Result<u64, SyncError> {
    let mut failures = 0u32;
    loop {
        match network.provider.get_head().await {
            Ok(block_number) => {
                info!(network = %network.name, block_number, failures, "fetched latest block");
                return Ok(block_number);
            }
            Err(e) => {
                failures += 1;
                error!(network = %network.name, attempt = failures, reason = %e, "failed to fetch latest block");
                if retry.exhausted(failures) {
                    return Err(SyncError::HeadUnavailable {
                        network: network.name.clone(),
                        attempts: failures,
                        reason: e.to_string(),
                    });
                }
                sleep(retry.delay_after(failures)).await;
            }
        }
    }
}
