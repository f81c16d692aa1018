//! End-to-end flows between two in-process nodes talking over real HTTP:
//! block sync during worker startup, transaction gossip, and fork recovery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{Keypair, PublicKey, SecretKey};
use tokio::net::TcpListener;
use tokio::sync::watch;

use forgechain::api::{self, AppState};
use forgechain::client::PeerClient;
use forgechain::crypto::account_id_from_public_key;
use forgechain::genesis::Genesis;
use forgechain::node::{Node, NodeHandle};
use forgechain::storage::MemoryStorage;
use forgechain::types::{AccountId, Peer, SignedTx, Tx};
use forgechain::worker::Worker;

fn keypair(seed: u8) -> Keypair {
    let secret = SecretKey::from_bytes(&[seed; 32]).expect("secret");
    let public = PublicKey::from(&secret);
    Keypair { secret, public }
}

fn account_id(seed: u8) -> AccountId {
    account_id_from_public_key(&keypair(seed).public)
}

const SENDER: u8 = 1;
const MINER_A: u8 = 9;
const MINER_B: u8 = 8;

fn genesis() -> Genesis {
    let mut balances = HashMap::new();
    balances.insert(account_id(SENDER).to_string(), 1_000_000);
    Genesis {
        chain_id: 1,
        mining_reward: 50,
        gas_price: 1,
        trans_per_block: 2,
        difficulty: 1,
        balances,
    }
}

fn transfer(nonce: u64) -> SignedTx {
    SignedTx::sign(
        Tx {
            chain_id: 1,
            nonce,
            to_id: account_id(2),
            value: 10,
            tip: 0,
            data: Vec::new(),
            gas_price: 1,
            gas_units: 1,
        },
        &keypair(SENDER),
    )
}

fn test_node(miner: u8, host: &str, origins: Vec<Peer>) -> Node {
    Node::new(
        genesis(),
        Arc::new(MemoryStorage::new()),
        account_id(miner),
        host.to_string(),
        origins,
    )
    .expect("node")
}

async fn mine_one(handle: &NodeHandle, nonces: [u64; 2]) {
    for nonce in nonces {
        handle.submit_transaction(transfer(nonce)).expect("tx");
    }
    let (_cancel, cancel_rx) = watch::channel(false);
    handle.mine_new_block(cancel_rx).await.expect("mine");
}

async fn serve(handle: NodeHandle, worker: Arc<Worker>) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let host = listener.local_addr().expect("addr").to_string();
    let app = api::router(AppState {
        node: handle,
        worker,
    });
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (host, server)
}

async fn wait_until(deadline: Duration, check: impl Fn() -> bool) -> bool {
    let started = std::time::Instant::now();
    while started.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn startup_sync_pulls_missing_blocks_from_a_peer() {
    let node_a = test_node(MINER_A, "127.0.0.1:1", Vec::new());
    let handle_a = node_a.handle();
    mine_one(&handle_a, [1, 2]).await;
    assert_eq!(handle_a.copy_latest_block().header.number, 1);

    let worker_a = Worker::start(handle_a.clone(), PeerClient::new().expect("client")).await;
    let (host_a, server) = serve(handle_a.clone(), worker_a.clone()).await;

    let node_b = test_node(MINER_B, "127.0.0.1:2", vec![Peer::new(host_a)]);
    let handle_b = node_b.handle();
    let worker_b = Worker::start(handle_b.clone(), PeerClient::new().expect("client")).await;

    assert_eq!(handle_b.copy_latest_block().header.number, 1);
    assert_eq!(
        handle_b.copy_latest_block().hash(),
        handle_a.copy_latest_block().hash()
    );
    assert_eq!(handle_b.copy_accounts(), handle_a.copy_accounts());

    // Gossip flows the other way: a transaction accepted by B reaches A.
    let tx = transfer(3);
    handle_b.submit_transaction(tx.clone()).expect("tx");
    worker_b.signal_share_transactions(vec![tx]);
    assert!(
        wait_until(Duration::from_secs(5), || {
            handle_a.query_mempool_length() == 1
        })
        .await
    );

    worker_b.shutdown().await;
    worker_a.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn fork_recovery_truncates_and_resyncs() {
    let node_a = test_node(MINER_A, "127.0.0.1:1", Vec::new());
    let handle_a = node_a.handle();
    mine_one(&handle_a, [1, 2]).await;
    mine_one(&handle_a, [3, 4]).await;
    assert_eq!(handle_a.copy_latest_block().header.number, 2);

    let worker_a = Worker::start(handle_a.clone(), PeerClient::new().expect("client")).await;
    let (host_a, server) = serve(handle_a.clone(), worker_a.clone()).await;

    // B mines its own block 1 before hearing from A, so A's block 2 cannot
    // link and the first sync pass ends in a truncate.
    let node_b = test_node(MINER_B, "127.0.0.1:2", vec![Peer::new(host_a)]);
    let handle_b = node_b.handle();
    mine_one(&handle_b, [1, 2]).await;
    assert_ne!(
        handle_b.copy_latest_block().hash(),
        handle_a.block_range(1, 1).expect("range")[0].hash()
    );

    let worker_b = Worker::start(handle_b.clone(), PeerClient::new().expect("client")).await;
    assert_eq!(handle_b.copy_latest_block().header.number, 0);

    // The next pass refetches the whole canonical chain from A.
    worker_b.signal_peer_updates();
    assert!(
        wait_until(Duration::from_secs(5), || {
            handle_b.copy_latest_block().header.number == 2
        })
        .await
    );
    assert_eq!(
        handle_b.copy_latest_block().hash(),
        handle_a.copy_latest_block().hash()
    );
    assert_eq!(handle_b.copy_accounts(), handle_a.copy_accounts());

    worker_b.shutdown().await;
    worker_a.shutdown().await;
    server.abort();
}
