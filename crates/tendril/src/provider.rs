//! Chain access: head lookups, log queries and block-arrival listeners.
//!
//! [JsonRpcProvider] speaks JSON-RPC over HTTP and follows new blocks either through a
//! WebSocket `newHeads` subscription or by polling `eth_blockNumber`. Each registered
//! listener runs in its own task, so deliveries to one listener never overlap.

use crate::config::{NetworkConfig, RetryConfig};
use crate::error::ProviderError;
use alloy::primitives::Address;
use alloy::rpc::types::Log;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Callback invoked with each new block number.
pub type BlockListener = Arc<dyn Fn(u64) + Send + Sync>;

/// `eth_getLogs` query over an inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    /// `None` queries every emitter.
    pub addresses: Option<Vec<Address>>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogQuery {
    /// JSON-RPC filter object.
    pub fn to_filter(&self) -> Value {
        let mut filter = json!({
            "fromBlock": format!("0x{:x}", self.from_block),
            "toBlock": format!("0x{:x}", self.to_block),
        });
        if let Some(addresses) = &self.addresses {
            filter["address"] = json!(addresses
                .iter()
                .map(|a| format!("0x{}", hex::encode(a)))
                .collect::<Vec<_>>());
        }
        filter
    }
}

/// RPC handle of one network.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Number of the latest block. May fail transiently.
    async fn get_head(&self) -> Result<u64, ProviderError>;

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, ProviderError>;

    /// Registers a block-arrival listener.
    fn on_block(&self, listener: BlockListener);

    /// Detaches every listener registered on this provider.
    fn remove_all_listeners(&self);
}

/// HTTP JSON-RPC provider with WebSocket or polling block feed.
pub struct JsonRpcProvider {
    http_client: reqwest::Client,
    http_url: String,
    ws_url: Option<String>,
    polling_interval: Duration,
    reconnection: RetryConfig,
    request_id: AtomicU64,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl JsonRpcProvider {
    pub fn new(config: &NetworkConfig) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            http_client,
            http_url: config.rpc_url.clone(),
            ws_url: config.ws_url.clone(),
            polling_interval: Duration::from_millis(config.polling_interval_ms.max(1)),
            reconnection: RetryConfig {
                max_attempts: 0,
                ..RetryConfig::default()
            },
            request_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Number of listener tasks currently attached.
    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|h| !h.is_finished());
        listeners.len()
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        http_json_rpc(&self.http_client, &self.http_url, method, params, id).await
    }
}

impl Drop for JsonRpcProvider {
    fn drop(&mut self) {
        self.remove_all_listeners();
    }
}

#[async_trait]
impl Provider for JsonRpcProvider {
    async fn get_head(&self) -> Result<u64, ProviderError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&result)
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, ProviderError> {
        let result = self.request("eth_getLogs", json!([query.to_filter()])).await?;
        serde_json::from_value(result).map_err(|e| ProviderError::Decode(e.to_string()))
    }

    fn on_block(&self, listener: BlockListener) {
        let handle = match &self.ws_url {
            Some(ws_url) => tokio::spawn(follow_new_heads(
                ws_url.clone(),
                self.reconnection.clone(),
                listener,
            )),
            None => tokio::spawn(poll_block_number(
                self.http_client.clone(),
                self.http_url.clone(),
                self.polling_interval,
                listener,
            )),
        };
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    fn remove_all_listeners(&self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for handle in listeners.drain(..) {
            handle.abort();
        }
    }
}

async fn http_json_rpc(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Value,
    id: u64,
) -> Result<Value, ProviderError> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    });
    let resp = client.post(url).json(&body).send().await?;
    let json: Value = resp.json().await?;
    if let Some(err) = json.get("error") {
        return Err(ProviderError::Rpc(err.to_string()));
    }
    json.get("result")
        .cloned()
        .ok_or_else(|| ProviderError::Decode("Missing result".into()))
}

fn parse_quantity(value: &Value) -> Result<u64, ProviderError> {
    let s = value
        .as_str()
        .ok_or_else(|| ProviderError::Decode(format!("quantity not string: {value}")))?;
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| ProviderError::Decode(e.to_string()))
}

/// Emits every block after `last` up to `head`; the first observation emits `head` only.
fn emit_through(last: &mut Option<u64>, head: u64, listener: &BlockListener) {
    let from = match *last {
        Some(l) if head <= l => return,
        Some(l) => l + 1,
        None => head,
    };
    for n in from..=head {
        listener(n);
    }
    *last = Some(head);
}

async fn poll_block_number(
    client: reqwest::Client,
    http_url: String,
    interval: Duration,
    listener: BlockListener,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut last = None;
    let mut id = 0u64;
    loop {
        ticker.tick().await;
        id += 1;
        let head = http_json_rpc(&client, &http_url, "eth_blockNumber", json!([]), id)
            .await
            .and_then(|v| parse_quantity(&v));
        match head {
            Ok(head) => emit_through(&mut last, head, &listener),
            Err(e) => tracing::debug!(reason = %e, "eth_blockNumber poll failed"),
        }
    }
}

async fn follow_new_heads(ws_url: String, reconnection: RetryConfig, listener: BlockListener) {
    let mut last = None;
    let mut failures = 0u32;
    loop {
        match subscribe_new_heads(&ws_url, &mut last, &listener).await {
            Ok(()) => failures = 0,
            Err(e) => {
                failures += 1;
                tracing::warn!(reason = %e, failures, "newHeads subscription failed, reconnecting...");
            }
        }
        sleep(reconnection.delay_after(failures.max(1))).await;
    }
}

async fn subscribe_new_heads(
    ws_url: &str,
    last: &mut Option<u64>,
    listener: &BlockListener,
) -> anyhow::Result<()> {
    let (ws_stream, _) = connect_async(ws_url).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let sub_req = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": ["newHeads"]
    });
    ws_sender
        .send(Message::Text(serde_json::to_string(&sub_req)?))
        .await?;

    match timeout(Duration::from_secs(10), ws_receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            let v: Value = serde_json::from_str(&text)?;
            if let Some(err) = v.get("error") {
                anyhow::bail!("subscribe error: {}", err);
            }
        }
        Ok(Some(Ok(_))) => anyhow::bail!("unexpected message"),
        Ok(Some(Err(e))) => return Err(e.into()),
        Ok(None) => anyhow::bail!("ws closed"),
        Err(_) => anyhow::bail!("subscribe timeout"),
    }

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg? {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        let v: Value = serde_json::from_str(&text)?;
        if v.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
            continue;
        }
        let number = v
            .get("params")
            .and_then(|p| p.get("result"))
            .and_then(|r| r.get("number"))
            .ok_or_else(|| anyhow::anyhow!("no params.result.number"))?;
        emit_through(last, parse_quantity(number)?, listener);
    }
    Ok(())
}
