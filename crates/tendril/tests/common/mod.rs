//! Common helpers for integration tests.
#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, LogData, B256};
use alloy::rpc::types::Log;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tendril::{
    BlockListener, CacheStore, HandlerQueue, LiveLogBatch, LogQuery, Network, Provider,
    ProviderError, RetryConfig,
};
use tokio::time::sleep;

/// True if `anvil` is on PATH.
pub fn anvil_available() -> bool {
    Command::new("anvil")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Spawn Anvil mining one block per second on a free port; returns the process and HTTP URL.
pub async fn spawn_anvil() -> Result<(Child, String)> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").context("bind for port")?;
        listener.local_addr()?.port()
    };
    let rpc_url = format!("http://127.0.0.1:{port}");
    let process = Command::new("anvil")
        .args(["--port", &port.to_string(), "--host", "127.0.0.1", "--block-time", "1"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("spawn anvil")?;
    wait_for_rpc(&rpc_url).await?;
    Ok((process, rpc_url))
}

async fn wait_for_rpc(url: &str) -> Result<()> {
    let client = reqwest::Client::new();
    for _ in 0..30 {
        let ok = client
            .post(url)
            .json(&serde_json::json!({"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}))
            .send()
            .await
            .is_ok();
        if ok {
            return Ok(());
        }
        sleep(Duration::from_millis(100)).await;
    }
    anyhow::bail!("RPC not ready");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("tendril=debug"))
        .with_test_writer()
        .try_init();
}

/// Retries immediately.
pub fn no_backoff(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_backoff_ms: 0,
        max_backoff_ms: 0,
    }
}

/// Scripted in-memory provider.
#[derive(Default)]
pub struct MockProvider {
    head: Mutex<u64>,
    head_failures: Mutex<VecDeque<String>>,
    head_calls: AtomicUsize,
    listeners: Mutex<Vec<BlockListener>>,
    logs: Mutex<HashMap<u64, Vec<Log>>>,
    log_failures: AtomicUsize,
    queries: Mutex<Vec<LogQuery>>,
}

impl MockProvider {
    pub fn with_head(head: u64) -> Arc<Self> {
        let provider = Self::default();
        *provider.head.lock().unwrap() = head;
        Arc::new(provider)
    }

    /// Fails the next `n` head requests, then succeeds.
    pub fn fail_head(&self, n: usize) {
        let mut failures = self.head_failures.lock().unwrap();
        for i in 0..n {
            failures.push_back(format!("connection refused ({i})"));
        }
    }

    /// Fails every head request.
    pub fn always_fail_head(&self) {
        self.fail_head(1_000);
    }

    /// Fails the next `n` log requests.
    pub fn fail_logs(&self, n: usize) {
        self.log_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_logs(&self, block_number: u64, logs: Vec<Log>) {
        self.logs.lock().unwrap().insert(block_number, logs);
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn queries(&self) -> Vec<LogQuery> {
        self.queries.lock().unwrap().clone()
    }

    /// Delivers a block arrival to every attached listener.
    pub fn emit(&self, block_number: u64) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(block_number);
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn get_head(&self) -> Result<u64, ProviderError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.head_failures.lock().unwrap().pop_front() {
            return Err(ProviderError::Rpc(reason));
        }
        Ok(*self.head.lock().unwrap())
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, ProviderError> {
        self.queries.lock().unwrap().push(query.clone());
        let remaining = self.log_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.log_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Rpc("header not found".into()));
        }
        let logs = self.logs.lock().unwrap();
        Ok(logs
            .get(&query.from_block)
            .into_iter()
            .flatten()
            .filter(|l| {
                query
                    .addresses
                    .as_ref()
                    .map_or(true, |a| a.contains(&l.address()))
            })
            .cloned()
            .collect())
    }

    fn on_block(&self, listener: BlockListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn remove_all_listeners(&self) {
        self.listeners.lock().unwrap().clear();
    }
}

pub fn mock_network(name: &str, chain_id: u64, provider: &Arc<MockProvider>) -> Network {
    Network::new(name, chain_id, Arc::clone(provider) as Arc<dyn Provider>)
}

pub fn log_at(emitter: Address, block_number: u64) -> Log {
    log_with(emitter, block_number, 0, vec![B256::with_last_byte(1)], Bytes::new())
}

pub fn log_with(
    emitter: Address,
    block_number: u64,
    log_index: u64,
    topics: Vec<B256>,
    data: Bytes,
) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: emitter,
            data: LogData::new_unchecked(topics, data),
        },
        block_number: Some(block_number),
        log_index: Some(log_index),
        ..Default::default()
    }
}

/// Cached range record: (chain id, addresses, start, end).
pub type CachedRange = (u64, Option<Vec<Address>>, u64, u64);

#[derive(Default)]
pub struct RecordingCache {
    pub logs: Mutex<Vec<(u64, Log)>>,
    pub ranges: Mutex<Vec<CachedRange>>,
}

#[async_trait]
impl CacheStore for RecordingCache {
    async fn insert_logs(&self, chain_id: u64, logs: &[Log]) -> Result<()> {
        let mut cached = self.logs.lock().unwrap();
        cached.extend(logs.iter().cloned().map(|l| (chain_id, l)));
        Ok(())
    }

    async fn insert_cached_range(
        &self,
        chain_id: u64,
        addresses: Option<&[Address]>,
        start_block: u64,
        end_block: u64,
    ) -> Result<()> {
        self.ranges.lock().unwrap().push((
            chain_id,
            addresses.map(|a| a.to_vec()),
            start_block,
            end_block,
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingHandler {
    pub batches: Mutex<Vec<LiveLogBatch>>,
}

impl RecordingHandler {
    /// (network, block number) of every dispatched batch, in dispatch order.
    pub fn blocks(&self) -> Vec<(String, u64)> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|b| (b.network.clone(), b.block_number))
            .collect()
    }
}

#[async_trait]
impl HandlerQueue for RecordingHandler {
    async fn dispatch(&self, batch: LiveLogBatch) -> Result<()> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}
