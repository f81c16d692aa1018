use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::PeerClient;
use crate::errors::{ChainError, ChainResult};
use crate::node::NodeHandle;
use crate::types::{Block, Peer, SignedTx};

/// Max pending share requests that may queue before new ones are dropped.
pub const MAX_TX_SHARE_REQUESTS: usize = 100;

/// How often the peer activity runs without being signalled.
pub const PEER_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// How long one mining attempt may run before it is cancelled.
pub const MINING_DEADLINE: Duration = Duration::from_secs(120);

/// Background orchestrator: three long-lived activities (peer sync, mining,
/// transaction gossip) over one shared node handle.
///
/// Every signal sender offers without blocking: a full channel drops the
/// signal, which coalesces bursts into a single pending wake-up. The
/// wake channels hold one slot each; only the share channel buffers.
pub struct Worker {
    node: NodeHandle,
    client: PeerClient,
    peer_updates: mpsc::Sender<()>,
    start_mining: mpsc::Sender<()>,
    cancel_mining: mpsc::Sender<()>,
    tx_sharing: mpsc::Sender<Vec<SignedTx>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    /// Spawns the three activities and returns once each has entered its
    /// receive loop. A synchronous peer-sync pass runs first so the node
    /// starts reasonably current.
    pub async fn start(node: NodeHandle, client: PeerClient) -> Arc<Worker> {
        let (peer_updates, peer_updates_rx) = mpsc::channel(1);
        let (start_mining, start_mining_rx) = mpsc::channel(1);
        let (cancel_mining, cancel_mining_rx) = mpsc::channel(1);
        let (tx_sharing, tx_sharing_rx) = mpsc::channel(MAX_TX_SHARE_REQUESTS);
        let (shutdown, _) = watch::channel(false);

        let worker = Arc::new(Worker {
            node,
            client,
            peer_updates,
            start_mining,
            cancel_mining,
            tx_sharing,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });

        worker.run_peer_update().await;

        let (ready, mut ready_rx) = mpsc::channel(3);
        let tasks = vec![
            tokio::spawn(worker.clone().peer_activity(
                peer_updates_rx,
                worker.shutdown.subscribe(),
                ready.clone(),
            )),
            tokio::spawn(worker.clone().mining_activity(
                start_mining_rx,
                cancel_mining_rx,
                worker.shutdown.subscribe(),
                ready.clone(),
            )),
            tokio::spawn(worker.clone().share_activity(
                tx_sharing_rx,
                worker.shutdown.subscribe(),
                ready,
            )),
        ];
        for _ in 0..tasks.len() {
            let _ = ready_rx.recv().await;
        }
        *worker.tasks.lock().await = tasks;
        worker
    }

    /// Interrupts any in-flight mining run, signals every activity to stop,
    /// and waits for all of them to return.
    pub async fn shutdown(&self) {
        info!("worker: shutdown started");
        self.signal_cancel_mining();
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(?err, "worker: activity did not exit cleanly");
            }
        }
        info!("worker: shutdown completed");
    }

    // =========================================================================
    // Signals. All of them offer-and-drop so callers never block.

    pub fn signal_peer_updates(&self) {
        let _ = self.peer_updates.try_send(());
        debug!("worker: peer update signalled");
    }

    pub fn signal_start_mining(&self) {
        let _ = self.start_mining.try_send(());
        debug!("worker: mining signalled");
    }

    pub fn signal_cancel_mining(&self) {
        let _ = self.cancel_mining.try_send(());
        debug!("worker: cancel mining signalled");
    }

    pub fn signal_share_transactions(&self, txs: Vec<SignedTx>) {
        match self.tx_sharing.try_send(txs) {
            Ok(()) => debug!("worker: share transactions signalled"),
            Err(_) => warn!("worker: share queue full, transactions will not be shared"),
        }
    }

    // =========================================================================
    // Activities.

    async fn peer_activity(
        self: Arc<Self>,
        mut wake: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
        ready: mpsc::Sender<()>,
    ) {
        debug!("worker: peer activity started");
        let mut ticker = time::interval_at(
            time::Instant::now() + PEER_UPDATE_INTERVAL,
            PEER_UPDATE_INTERVAL,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let _ = ready.send(()).await;
        loop {
            tokio::select! {
                _ = wake.recv() => {
                    if !*shutdown.borrow() {
                        self.run_peer_update().await;
                    }
                }
                _ = ticker.tick() => {
                    if !*shutdown.borrow() {
                        self.run_peer_update().await;
                    }
                }
                _ = shutdown.changed() => {
                    debug!("worker: peer activity received shutdown");
                    return;
                }
            }
        }
    }

    async fn mining_activity(
        self: Arc<Self>,
        mut wake: mpsc::Receiver<()>,
        mut cancel: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
        ready: mpsc::Sender<()>,
    ) {
        debug!("worker: mining activity started");
        let _ = ready.send(()).await;
        loop {
            tokio::select! {
                _ = wake.recv() => {
                    if !*shutdown.borrow() {
                        self.run_mining_operation(&mut cancel).await;
                    }
                }
                _ = shutdown.changed() => {
                    debug!("worker: mining activity received shutdown");
                    return;
                }
            }
        }
    }

    async fn share_activity(
        self: Arc<Self>,
        mut wake: mpsc::Receiver<Vec<SignedTx>>,
        mut shutdown: watch::Receiver<bool>,
        ready: mpsc::Sender<()>,
    ) {
        debug!("worker: share activity started");
        let _ = ready.send(()).await;
        loop {
            tokio::select! {
                Some(txs) = wake.recv() => {
                    if !*shutdown.borrow() {
                        self.run_share_operation(txs).await;
                    }
                }
                _ = shutdown.changed() => {
                    debug!("worker: share activity received shutdown");
                    return;
                }
            }
        }
    }

    // =========================================================================
    // Operations.

    /// One sync pass: for every known peer, merge its peer list and import
    /// any blocks we are missing. A detected fork truncates our tip and ends
    /// the pass; the next tick retries against the rewound chain.
    async fn run_peer_update(&self) {
        debug!("worker: peer update started");
        for peer in self.node.copy_known_peers() {
            let status = match self.client.status(&peer).await {
                Ok(status) => status,
                Err(err) => {
                    warn!(peer = %peer, %err, "worker: peer status query failed");
                    continue;
                }
            };

            if let Err(err) = self.add_new_peers(status.known_peers) {
                warn!(peer = %peer, %err, "worker: merging peer list failed");
            }

            if status.latest_block_number > self.node.copy_latest_block().header.number {
                debug!(
                    peer = %peer,
                    latest = status.latest_block_number,
                    "worker: peer is ahead"
                );
                if let Err(err) = self.write_peer_blocks(&peer).await {
                    warn!(peer = %peer, %err, "worker: importing peer blocks failed");
                    if matches!(err, ChainError::ChainForked) {
                        if let Err(err) = self.node.truncate() {
                            error!(%err, "worker: fork recovery failed");
                        }
                        break;
                    }
                }
            }
        }
        debug!("worker: peer update completed");
    }

    fn add_new_peers(&self, peers: Vec<Peer>) -> ChainResult<()> {
        // TODO: an already-known peer ends the merge early; the remainder of
        // the list should still be attempted.
        for peer in peers {
            if self.node.add_peer_node(peer.clone()).is_err() {
                return Ok(());
            }
            debug!(peer = %peer, "worker: added peer node");
        }
        Ok(())
    }

    async fn write_peer_blocks(&self, peer: &Peer) -> ChainResult<()> {
        let from = self.node.copy_latest_block().header.number + 1;
        let blocks = self.client.block_list(peer, from).await?;
        debug!(peer = %peer, count = blocks.len(), "worker: fetched peer blocks");
        for block in blocks {
            let height = block.header.number;
            self.node.write_next_block(block)?;
            debug!(height, "worker: imported peer block");
        }
        Ok(())
    }

    /// One mining run. Stale cancel signals are drained first so an earlier,
    /// unconsumed cancellation cannot kill this run; both the cancel signal
    /// and the deadline flip the same token the prover polls. On exit the
    /// operation re-arms itself while a full block of transactions is
    /// still pending.
    async fn run_mining_operation(&self, cancel: &mut mpsc::Receiver<()>) {
        info!("worker: mining operation started");
        while cancel.try_recv().is_ok() {
            debug!("worker: drained stale cancel signal");
        }

        let trans_per_block = self.node.genesis().trans_per_block as usize;
        let pending = self.node.query_mempool_length();
        if pending < trans_per_block {
            debug!(pending, "worker: not enough transactions to mine");
            return;
        }

        let (cancel_token, token_rx) = watch::channel(false);
        let mine = self.node.mine_new_block(token_rx);
        tokio::pin!(mine);
        let deadline = time::sleep(MINING_DEADLINE);
        tokio::pin!(deadline);

        let mut cancelled = false;
        let result = loop {
            tokio::select! {
                result = &mut mine => break result,
                _ = cancel.recv(), if !cancelled => {
                    cancelled = true;
                    let _ = cancel_token.send(true);
                }
                _ = &mut deadline, if !cancelled => {
                    debug!("worker: mining deadline reached");
                    cancelled = true;
                    let _ = cancel_token.send(true);
                }
            }
        };

        match result {
            Ok((block, duration)) => {
                info!(
                    height = block.header.number,
                    transactions = block.transactions.len(),
                    ?duration,
                    "worker: mined block"
                );
                if let Err(err) = self.send_block_to_peers(&block).await {
                    warn!(%err, "worker: announcing mined block failed");
                }
            }
            Err(ChainError::NotEnoughTransactions) => {
                warn!("worker: not enough transactions in mempool");
            }
            Err(ChainError::Cancelled) => warn!("worker: mining cancelled"),
            Err(err) => error!(%err, "worker: mining failed"),
        }

        if self.node.query_mempool_length() >= trans_per_block {
            self.signal_start_mining();
        }
        info!("worker: mining operation completed");
    }

    async fn send_block_to_peers(&self, block: &Block) -> ChainResult<()> {
        for peer in self.node.copy_known_peers() {
            self.client
                .announce_block(&peer, block)
                .await
                .map_err(|err| ChainError::PeerUnreachable(format!("{}: {err}", peer.host)))?;
            debug!(peer = %peer, "worker: block announced");
        }
        Ok(())
    }

    async fn run_share_operation(&self, txs: Vec<SignedTx>) {
        debug!(count = txs.len(), "worker: share operation started");
        for peer in self.node.copy_known_peers() {
            if let Err(err) = self.client.share_transactions(&peer, &txs).await {
                warn!(peer = %peer, %err, "worker: sharing transactions failed");
            }
        }
        debug!("worker: share operation completed");
    }
}
