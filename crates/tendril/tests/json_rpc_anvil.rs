//! Integration test: JsonRpcProvider against a local Anvil node (skipped without anvil).

mod common;

use common::{anvil_available, init_tracing, spawn_anvil};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tendril::{BlockListener, JsonRpcProvider, LogQuery, NetworkConfig, Provider};
use tokio::time::timeout;

fn network(rpc_url: &str, ws: bool) -> NetworkConfig {
    NetworkConfig {
        name: "anvil".into(),
        chain_id: 31337,
        rpc_url: rpc_url.to_string(),
        ws_url: ws.then(|| rpc_url.replace("http://", "ws://")),
        polling_interval_ms: 200,
    }
}

/// Collects block numbers until `count` arrive.
async fn collect_blocks(provider: &JsonRpcProvider, count: usize) -> Vec<u64> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener: BlockListener = Arc::new(move |n| sink.lock().unwrap().push(n));
    provider.on_block(listener);
    let _ = timeout(Duration::from_secs(15), async {
        while seen.lock().unwrap().len() < count {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    provider.remove_all_listeners();
    let blocks = seen.lock().unwrap().clone();
    blocks
}

fn assert_consecutive(blocks: &[u64]) {
    assert!(blocks.windows(2).all(|w| w[1] == w[0] + 1), "gap or repeat in {blocks:?}");
}

#[tokio::test]
async fn test_json_rpc_provider_against_anvil() {
    if !anvil_available() {
        eprintln!("skipping test_json_rpc_provider_against_anvil: anvil not in PATH");
        return;
    }
    init_tracing();
    let (mut anvil_process, rpc_url) = spawn_anvil().await.expect("spawn anvil");

    let provider = JsonRpcProvider::new(&network(&rpc_url, false)).expect("provider");
    let head = tokio_test::assert_ok!(provider.get_head().await);
    let logs = tokio_test::assert_ok!(
        provider
            .get_logs(&LogQuery {
                addresses: None,
                from_block: 0,
                to_block: head,
            })
            .await
    );
    assert!(logs.is_empty());

    let polled = collect_blocks(&provider, 3).await;
    assert!(polled.len() >= 3, "polling delivered {polled:?}");
    assert!(polled[0] >= head);
    assert_consecutive(&polled);
    assert_eq!(provider.listener_count(), 0);

    let ws_provider = JsonRpcProvider::new(&network(&rpc_url, true)).expect("ws provider");
    let pushed = collect_blocks(&ws_provider, 2).await;
    assert!(pushed.len() >= 2, "newHeads delivered {pushed:?}");
    assert_consecutive(&pushed);

    let _ = anvil_process.kill();
}
