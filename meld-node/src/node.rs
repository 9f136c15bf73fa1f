//! The node shell.
//!
//! Wires the replica, the transport, and the three timers together and
//! owns the lifecycle: `created -> running -> stopping -> stopped`, one
//! way only. Errors inside the loops are logged and the loop continues;
//! the only fatal start error is a failed socket bind.

use crate::config::{NodeConfig, PeerAddr};
use crate::protocol::Envelope;
use crate::transport::Transport;
use crate::{NodeError, NodeResult, snapshot};
use meld_crdt::Replica;
use meld_types::NodeId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Period of the snapshot-to-disk timer.
const SAVE_INTERVAL: Duration = Duration::from_secs(30);
/// Listener receive timeout, short so shutdown stays responsive.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);
/// How long `stop` waits for each task before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);
/// Room for the largest datagram the protocol allows.
const MAX_RECV_BUF: usize = 65_535;

/// Lifecycle states. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// One replica process: a CRDT value, a UDP socket, and four loops.
pub struct Node {
    config: NodeConfig,
    replica: Arc<Mutex<Replica>>,
    gossip: Option<Arc<Gossip>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    lifecycle: Lifecycle,
}

impl Node {
    /// Creates a node from validated configuration. The sync folder is
    /// created if missing; state restore happens in [`Node::start`].
    pub fn new(config: NodeConfig) -> NodeResult<Self> {
        std::fs::create_dir_all(&config.sync_folder)?;
        let replica = Replica::new(
            config.crdt_type,
            config.node_id.clone(),
            &config.sync_folder,
        );
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            replica: Arc::new(Mutex::new(replica)),
            gossip: None,
            shutdown,
            tasks: Vec::new(),
            lifecycle: Lifecycle::Created,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Handle to the shared replica, for queries and local operations.
    #[must_use]
    pub fn replica(&self) -> Arc<Mutex<Replica>> {
        Arc::clone(&self.replica)
    }

    /// One-line operator summary of the replicated state.
    pub async fn summary(&self) -> String {
        self.replica.lock().await.summary()
    }

    /// Restores state from the snapshot, binds the socket, and launches
    /// the listener and the three timers. Returns once everything is up.
    pub async fn start(&mut self) -> NodeResult<()> {
        if self.lifecycle != Lifecycle::Created {
            return Err(NodeError::Lifecycle("start requires a fresh node"));
        }

        self.restore_state().await;

        let transport = Transport::bind(&self.config.bind_addr()).await?;
        info!("socket bound to {}", self.config.bind_addr());

        let gossip = Arc::new(Gossip {
            node_id: self.config.node_id.clone(),
            peers: self.config.peers.clone(),
            state_file: self.config.state_file.clone(),
            replica: Arc::clone(&self.replica),
            transport,
            send_failures: Mutex::new(HashMap::new()),
        });
        self.gossip = Some(Arc::clone(&gossip));

        self.tasks.push(spawn_listener(
            Arc::clone(&gossip),
            self.shutdown.subscribe(),
        ));
        self.tasks.push(spawn_sync_timer(
            Arc::clone(&gossip),
            Duration::from_secs(self.config.sync_interval),
            self.shutdown.subscribe(),
        ));
        self.tasks.push(spawn_scan_timer(
            Arc::clone(&self.replica),
            Duration::from_secs(self.config.scan_interval),
            self.shutdown.subscribe(),
        ));
        self.tasks.push(spawn_save_timer(
            Arc::clone(&gossip),
            self.shutdown.subscribe(),
        ));

        self.lifecycle = Lifecycle::Running;
        info!(
            "{} node {} started ({} peers)",
            self.config.crdt_type,
            self.config.node_id,
            self.config.peers.len()
        );
        info!("{}", self.summary().await);
        Ok(())
    }

    /// Forces one gossip round immediately. Returns how many peers were
    /// reached.
    pub async fn sync_now(&self) -> usize {
        match &self.gossip {
            Some(gossip) => gossip.round().await,
            None => {
                warn!("sync_now called before start");
                0
            }
        }
    }

    /// Signals every loop to quit, waits for them to drain, flushes a
    /// final snapshot, and closes the socket.
    pub async fn stop(&mut self) {
        if self.lifecycle != Lifecycle::Running {
            debug!("stop called in state {:?}, nothing to do", self.lifecycle);
            return;
        }
        self.lifecycle = Lifecycle::Stopping;
        info!("node {} stopping", self.config.node_id);

        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            match tokio::time::timeout(STOP_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("task ended abnormally: {e}"),
                Err(_) => {
                    warn!("task did not stop within {STOP_TIMEOUT:?}, aborting it");
                    abort.abort();
                }
            }
        }

        // Final flush; the socket closes when the gossip handle drops.
        let state = self.replica.lock().await.encode();
        if let Err(e) = snapshot::save(&self.config.state_file, &state) {
            error!("final snapshot failed: {e}");
        }
        self.gossip = None;

        self.lifecycle = Lifecycle::Stopped;
        info!("node {} stopped", self.config.node_id);
    }

    async fn restore_state(&self) {
        match snapshot::load(&self.config.state_file) {
            Ok(Some(value)) => {
                match Replica::restore(
                    self.config.crdt_type,
                    self.config.node_id.clone(),
                    &self.config.sync_folder,
                    &value,
                ) {
                    Ok(restored) => {
                        info!("state restored from {}", self.config.state_file.display());
                        *self.replica.lock().await = restored;
                    }
                    Err(e) => {
                        error!(
                            "snapshot {} does not decode as {}, starting empty: {e}",
                            self.config.state_file.display(),
                            self.config.crdt_type
                        );
                    }
                }
            }
            Ok(None) => debug!("no snapshot at {}", self.config.state_file.display()),
            Err(e) => {
                error!(
                    "cannot read snapshot {}, starting empty: {e}",
                    self.config.state_file.display()
                );
            }
        }
    }
}

/// Shared context of the listener, sync, and save loops.
struct Gossip {
    node_id: NodeId,
    peers: Vec<PeerAddr>,
    state_file: PathBuf,
    replica: Arc<Mutex<Replica>>,
    transport: Transport,
    /// Running failure count per peer.
    send_failures: Mutex<HashMap<String, u64>>,
}

impl Gossip {
    /// One gossip round: scan, encode under the lock, then fan out to all
    /// peers lock-free. Returns how many peers were reached.
    async fn round(&self) -> usize {
        let bytes = {
            let mut replica = self.replica.lock().await;
            replica.update_local_state();
            let envelope = Envelope::state_sync(self.node_id.clone(), replica.encode());
            match envelope.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("refusing to gossip: {e}");
                    return 0;
                }
            }
        };

        let mut reached = 0;
        for peer in &self.peers {
            match self.transport.send_to_peer(&bytes, peer).await {
                Ok(()) => {
                    reached += 1;
                    debug!("sent state sync to {peer}");
                }
                Err(e) => {
                    let mut failures = self.send_failures.lock().await;
                    let count = failures.entry(peer.to_string()).or_insert(0);
                    *count += 1;
                    warn!("failed to sync with {peer} (failure #{count}): {e}");
                }
            }
        }
        if reached > 0 {
            info!("state synced with {reached}/{} peers", self.peers.len());
        }
        reached
    }

    /// Handles one received datagram: merge-and-ack for state syncs,
    /// debug log for acks, warn-and-drop for anything else.
    async fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        match Envelope::from_bytes(data) {
            Err(e) => warn!("dropping malformed datagram from {addr}: {e}"),
            Ok(Envelope::StateSync { node_id, state, .. }) => {
                debug!("received state sync from {node_id} ({addr})");
                let merged = {
                    let mut replica = self.replica.lock().await;
                    replica.merge_value(&state)
                };
                match merged {
                    Ok(true) => info!("state synchronized from {node_id}"),
                    Ok(false) => debug!("state from {node_id} changed nothing"),
                    Err(e) => {
                        warn!("dropping undecodable state from {node_id}: {e}");
                        return;
                    }
                }
                match Envelope::ack(self.node_id.clone()).to_bytes() {
                    Ok(bytes) => {
                        if let Err(e) = self.transport.send_to_addr(&bytes, addr).await {
                            error!("failed to send ack to {addr}: {e}");
                        }
                    }
                    Err(e) => error!("failed to encode ack: {e}"),
                }
            }
            Ok(Envelope::Ack { node_id, .. }) => debug!("received ack from {node_id}"),
        }
    }

    /// Encodes under the lock, writes the snapshot outside it.
    async fn save_snapshot(&self) {
        let state = self.replica.lock().await.encode();
        if let Err(e) = snapshot::save(&self.state_file, &state) {
            error!(
                "failed to write snapshot {}, keeping in-memory state: {e}",
                self.state_file.display()
            );
        } else {
            debug!("state saved to {}", self.state_file.display());
        }
    }
}

fn spawn_listener(gossip: Arc<Gossip>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_RECV_BUF];
        while !*shutdown.borrow() {
            match gossip.transport.recv_timeout(&mut buf, RECV_TIMEOUT).await {
                None => continue,
                Some(Ok((len, addr))) => gossip.handle_datagram(&buf[..len], addr).await,
                Some(Err(e)) => {
                    if !*shutdown.borrow() {
                        warn!("receive error: {e}");
                    }
                }
            }
        }
        debug!("listener stopped");
    })
}

fn spawn_sync_timer(
    gossip: Arc<Gossip>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    gossip.round().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("sync timer stopped");
    })
}

fn spawn_scan_timer(
    replica: Arc<Mutex<Replica>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    replica.lock().await.update_local_state();
                    debug!("state scan completed");
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("scan timer stopped");
    })
}

fn spawn_save_timer(gossip: Arc<Gossip>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SAVE_INTERVAL) => {
                    gossip.save_snapshot().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("save timer stopped");
    })
}

/// Resolves when an interrupt or terminate signal arrives.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("cannot install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
        _ = terminate => info!("terminate received, shutting down"),
    }
}
