use super::config::{Config, RelayConfig};
use super::errors::Error;
use super::peer::{Peer, PeerHandle, PeerWorker};
use super::task_queue::{PeerTask, TaskQueue};
use super::transport::{Connector, PeerWiring, WebRTCConnector};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Copy-on-write list of registered peers. The lock is held only to swap
/// the list, so iterating a snapshot never blocks registration.
#[derive(Clone, Default)]
pub(crate) struct PeerSet {
    peers: Arc<Mutex<Arc<Vec<Peer>>>>,
}

impl PeerSet {
    pub(crate) async fn snapshot(&self) -> Arc<Vec<Peer>> {
        self.peers.lock().await.clone()
    }

    pub(crate) async fn insert(&self, peer: Peer) {
        let mut peers = self.peers.lock().await;
        let mut next = Vec::with_capacity(peers.len() + 1);
        next.extend(peers.iter().cloned());
        next.push(peer);
        *peers = Arc::new(next);
    }

    /// Returns false if the peer was already gone.
    pub(crate) async fn remove(&self, peer: &Peer) -> bool {
        let mut peers = self.peers.lock().await;
        if !peers.iter().any(|p| p.same(peer)) {
            return false;
        }
        let next: Vec<Peer> = peers.iter().filter(|p| !p.same(peer)).cloned().collect();
        *peers = Arc::new(next);
        true
    }
}

/// The relay: every track published by one peer is forwarded to all others.
pub struct PartyLine {
    config: RelayConfig,
    connector: Arc<dyn Connector>,
    peers: PeerSet,
}

impl PartyLine {
    pub fn new(config: &Config) -> Result<Self> {
        let connector = WebRTCConnector::new(config)?;
        Ok(PartyLine::with_connector(
            config.relay.clone(),
            Arc::new(connector),
        ))
    }

    pub(crate) fn with_connector(config: RelayConfig, connector: Arc<dyn Connector>) -> Self {
        PartyLine {
            config,
            connector,
            peers: PeerSet::default(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub async fn peers(&self) -> Vec<Peer> {
        self.peers.snapshot().await.iter().cloned().collect()
    }

    /// Registers a participant for the lifetime of `token`. Cancelling the
    /// token is the only way to remove it again. Fails only when the
    /// connection cannot be created, in which case nothing is registered.
    pub async fn add_peer(&self, token: CancellationToken, handle: PeerHandle) -> Result<Peer> {
        if token.is_cancelled() {
            return Err(Error::ErrPeerClosed.into());
        }

        let PeerHandle {
            user_id,
            max_bandwidth,
            send_to_peer,
            map_track,
        } = handle;
        let max_bandwidth = max_bandwidth.unwrap_or(self.config.max_bandwidth);

        let (queue, tasks) = TaskQueue::new(user_id, self.config.queue_capacity(), token.clone());
        let on_signal = Arc::new(Mutex::new(send_to_peer));

        let transport = self
            .connector
            .connect(PeerWiring {
                user_id,
                token: token.clone(),
                queue: queue.clone(),
                on_signal: on_signal.clone(),
            })
            .await?;

        // ahead of any fan-out task this peer can receive
        if let Err(err) = queue.push(PeerTask::Bootstrap).await {
            if let Err(close_err) = transport.close().await {
                log::warn!("peer {} close error: {}", user_id, close_err);
            }
            return Err(err.into());
        }

        let peer = Peer::new(user_id, max_bandwidth, token, queue);
        self.peers.insert(peer.clone()).await;

        let worker = PeerWorker::new(
            peer.clone(),
            self.peers.clone(),
            transport.clone(),
            on_signal,
            map_track,
            self.config.feedback_interval(),
        );
        tokio::spawn(worker.run(tasks));

        let peers = self.peers.clone();
        let departing = peer.clone();
        tokio::spawn(async move {
            departing.closed().await;
            peers.remove(&departing).await;
            if let Err(err) = transport.close().await {
                log::warn!("peer {} close error: {}", departing.user_id(), err);
            }
            log::info!("peer {} left the party line", departing.user_id());
        });

        log::info!(
            "peer {} joined the party line, max bandwidth {}",
            user_id,
            max_bandwidth
        );
        Ok(peer)
    }
}
