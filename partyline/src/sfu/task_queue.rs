use super::errors::{Error, Result};
use super::peer::Peer;
use super::relay_track::{InboundTrack, RelayTrack};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Work items run one at a time by a peer's worker. Every task carries an
/// owned snapshot of the peer and track it targets.
pub(crate) enum PeerTask {
    // first task of every peer: ask the others for their tracks, then offer
    Bootstrap,
    Negotiate { ice_restart: bool },
    Answer(RTCSessionDescription),
    Candidate(RTCIceCandidateInit),
    Publish(InboundTrack),
    // run on an existing peer: hand its published tracks to a newcomer
    ShareTracks { with: Peer },
    Subscribe { track: Arc<RelayTrack>, publisher: Peer },
    Unsubscribe { track_key: Uuid },
}

impl PeerTask {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            PeerTask::Bootstrap => "bootstrap",
            PeerTask::Negotiate { .. } => "negotiate",
            PeerTask::Answer(_) => "answer",
            PeerTask::Candidate(_) => "candidate",
            PeerTask::Publish(_) => "publish",
            PeerTask::ShareTracks { .. } => "share tracks",
            PeerTask::Subscribe { .. } => "subscribe",
            PeerTask::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

/// Sending half of a peer's mailbox.
#[derive(Clone)]
pub(crate) struct TaskQueue {
    user_id: u32,
    tx: mpsc::Sender<PeerTask>,
    token: CancellationToken,
}

impl TaskQueue {
    pub(crate) fn new(
        user_id: u32,
        capacity: usize,
        token: CancellationToken,
    ) -> (Self, mpsc::Receiver<PeerTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        (TaskQueue { user_id, tx, token }, rx)
    }

    // For producers owned by the peer itself: waits for room in the queue.
    pub(crate) async fn push(&self, task: PeerTask) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::ErrPeerClosed);
        }
        tokio::select! {
            _ = self.token.cancelled() => Err(Error::ErrPeerClosed),
            rv = self.tx.send(task) => rv.map_err(|_| Error::ErrPeerClosed),
        }
    }

    // For cross-peer producers: never waits. A full queue means the peer
    // is stuck, so it gets disconnected.
    pub(crate) fn offer(&self, task: PeerTask) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::ErrPeerClosed);
        }
        match self.tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => {
                log::warn!(
                    "peer {} task queue is full, dropping {} and disconnecting",
                    self.user_id,
                    task.name()
                );
                self.token.cancel();
                Err(Error::ErrQueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(Error::ErrPeerClosed),
        }
    }
}
