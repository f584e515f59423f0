use super::mid_map::PendingMids;
use super::negotiation::NegotiationState;
use super::party_line::PeerSet;
use super::relay_track::{InboundTrack, RelayTrack};
use super::task_queue::{PeerTask, TaskQueue};
use super::transport::{MediaLine, Transport};
use crate::feedback::feedback::Feedback;
use crate::signal::envelope::{Inbound, MapTrack, Outbound};
use crate::signal::errors::SignalError;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

pub type OnSignalFn = Box<
    dyn (FnMut(Outbound) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync,
>;

pub type OnMapTrackFn = Box<
    dyn (FnMut(MapTrack) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync,
>;

pub(crate) async fn send_signal(on_signal: &Arc<Mutex<OnSignalFn>>, message: Outbound) {
    let mut handler = on_signal.lock().await;
    let f = &mut *handler;
    f(message).await;
}

/// Everything the party line needs to register a participant.
pub struct PeerHandle {
    pub user_id: u32,
    /// Overrides the relay-wide maximum bandwidth hint.
    pub max_bandwidth: Option<u64>,
    pub send_to_peer: OnSignalFn,
    pub map_track: OnMapTrackFn,
}

struct PeerInner {
    user_id: u32,
    max_bandwidth: u64,
    token: CancellationToken,
    queue: TaskQueue,
}

/// A registered participant. Cloning is cheap; all clones refer to the
/// same peer, whose state only its own task queue worker mutates.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    pub(crate) fn new(
        user_id: u32,
        max_bandwidth: u64,
        token: CancellationToken,
        queue: TaskQueue,
    ) -> Self {
        Peer {
            inner: Arc::new(PeerInner {
                user_id,
                max_bandwidth,
                token,
                queue,
            }),
        }
    }

    pub fn user_id(&self) -> u32 {
        self.inner.user_id
    }

    pub fn max_bandwidth(&self) -> u64 {
        self.inner.max_bandwidth
    }

    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub async fn closed(&self) {
        self.inner.token.cancelled().await
    }

    pub(crate) fn queue(&self) -> &TaskQueue {
        &self.inner.queue
    }

    pub(crate) fn same(&self, other: &Peer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queues a raw `[type, body]` message from this peer's client. Malformed
    /// messages are returned as errors and leave the peer untouched.
    pub async fn handle_message(&self, message: Value) -> Result<()> {
        let task = match Inbound::from_value(message)? {
            Inbound::Answer(answer) => PeerTask::Answer(answer),
            Inbound::Renegotiate => PeerTask::Negotiate { ice_restart: false },
            Inbound::IceCandidate(Some(candidate)) => PeerTask::Candidate(candidate),
            // end of candidates
            Inbound::IceCandidate(None) => return Ok(()),
        };
        self.inner.queue.push(task).await?;
        Ok(())
    }

    pub async fn handle_text(&self, message: &str) -> Result<()> {
        let value: Value = serde_json::from_str(message)
            .map_err(|err| SignalError::ErrNotJson(err.to_string()))?;
        self.handle_message(value).await
    }

    /// Fires the negotiation-needed trigger.
    pub async fn renegotiate(&self) -> Result<()> {
        self.inner
            .queue
            .push(PeerTask::Negotiate { ice_restart: false })
            .await?;
        Ok(())
    }
}

struct Published {
    track: Arc<RelayTrack>,
    feedback_task: JoinHandle<()>,
}

struct Subscription {
    track: Arc<RelayTrack>,
    line: Arc<dyn MediaLine>,
}

/// The single writer of a peer's negotiation and track state.
pub(crate) struct PeerWorker {
    peer: Peer,
    peers: PeerSet,
    transport: Arc<dyn Transport>,
    on_signal: Arc<Mutex<OnSignalFn>>,
    map_track: OnMapTrackFn,
    feedback_interval: Duration,

    negotiation: NegotiationState,
    published: Vec<Published>,
    subscriptions: HashMap<Uuid, Subscription>,
    pending_mids: PendingMids,
}

impl PeerWorker {
    pub(crate) fn new(
        peer: Peer,
        peers: PeerSet,
        transport: Arc<dyn Transport>,
        on_signal: Arc<Mutex<OnSignalFn>>,
        map_track: OnMapTrackFn,
        feedback_interval: Duration,
    ) -> Self {
        PeerWorker {
            peer,
            peers,
            transport,
            on_signal,
            map_track,
            feedback_interval,
            negotiation: NegotiationState::new(),
            published: Vec::new(),
            subscriptions: HashMap::new(),
            pending_mids: PendingMids::new(),
        }
    }

    pub(crate) async fn run(mut self, mut tasks: mpsc::Receiver<PeerTask>) {
        let token = self.peer.token();
        loop {
            let task = tokio::select! {
                _ = token.cancelled() => break,
                task = tasks.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };
            self.handle(task).await;
        }
        self.shutdown().await;
    }

    async fn handle(&mut self, task: PeerTask) {
        let user_id = self.peer.user_id();
        log::debug!("peer {} running {}", user_id, task.name());

        match task {
            PeerTask::Bootstrap => self.bootstrap().await,
            PeerTask::Negotiate { ice_restart } => {
                if ice_restart {
                    log::info!("peer {} restarting ice", user_id);
                }
                self.negotiate(ice_restart).await
            }
            PeerTask::Answer(answer) => self.apply_answer(answer).await,
            PeerTask::Candidate(candidate) => {
                if let Err(err) = self.transport.add_ice_candidate(candidate).await {
                    log::warn!("peer {} failed to add ice candidate: {}", user_id, err);
                }
            }
            PeerTask::Publish(inbound) => self.publish(inbound).await,
            PeerTask::ShareTracks { with } => self.share_tracks(&with),
            PeerTask::Subscribe { track, publisher } => self.subscribe(track, publisher).await,
            PeerTask::Unsubscribe { track_key } => self.unsubscribe(track_key).await,
        }
    }

    async fn bootstrap(&mut self) {
        let peers = self.peers.snapshot().await;
        for peer in peers.iter() {
            if peer.same(&self.peer) {
                continue;
            }
            let task = PeerTask::ShareTracks {
                with: self.peer.clone(),
            };
            if let Err(err) = peer.queue().offer(task) {
                log::warn!(
                    "peer {} cannot ask peer {} for tracks: {}",
                    self.peer.user_id(),
                    peer.user_id(),
                    err
                );
            }
        }
        self.negotiate(false).await;
    }

    async fn negotiate(&mut self, ice_restart: bool) {
        if !self.negotiation.begin_offer(ice_restart) {
            log::debug!("peer {} offer in flight, queueing another", self.peer.user_id());
            return;
        }
        if let Err(err) = self.send_offer(ice_restart).await {
            self.negotiation.offer_failed();
            log::error!("peer {} failed to send offer: {}", self.peer.user_id(), err);
        }
    }

    async fn send_offer(&mut self, ice_restart: bool) -> Result<()> {
        let offer = self.transport.create_offer(ice_restart).await?;
        self.transport.set_local_description(offer.clone()).await?;

        log::debug!(
            "peer {} local description set, {} mids pending",
            self.peer.user_id(),
            self.pending_mids.len()
        );
        for mapping in self.pending_mids.resolve().await {
            (self.map_track)(mapping).await;
        }

        send_signal(&self.on_signal, Outbound::Offer(offer)).await;
        Ok(())
    }

    async fn apply_answer(&mut self, answer: RTCSessionDescription) {
        if let Err(err) = self.transport.set_remote_description(answer).await {
            log::warn!("peer {} failed to use answer: {}", self.peer.user_id(), err);
        }
        if self.negotiation.answer_applied() {
            self.negotiate(false).await;
        }
    }

    async fn publish(&mut self, inbound: InboundTrack) {
        let feedback = Arc::new(Feedback::new(
            inbound.media_ssrc,
            inbound.kind,
            self.transport.clone(),
        ));
        let track = Arc::new(RelayTrack::new(
            self.peer.user_id(),
            inbound,
            feedback.clone(),
        ));
        let feedback_task = tokio::spawn(
            feedback
                .clone()
                .run(self.feedback_interval, self.peer.token()),
        );
        self.published.push(Published {
            track: track.clone(),
            feedback_task,
        });

        log::info!(
            "peer {} published {} track {}",
            self.peer.user_id(),
            track.kind(),
            track.key()
        );

        let peers = self.peers.snapshot().await;
        for peer in peers.iter() {
            if peer.same(&self.peer) {
                continue;
            }
            self.offer_track(peer, &track);
        }

        feedback.request_key_frame().await;
    }

    fn share_tracks(&self, with: &Peer) {
        if with.is_closed() {
            return;
        }
        for published in &self.published {
            self.offer_track(with, &published.track);
        }
    }

    fn offer_track(&self, subscriber: &Peer, track: &Arc<RelayTrack>) {
        let task = PeerTask::Subscribe {
            track: track.clone(),
            publisher: self.peer.clone(),
        };
        if let Err(err) = subscriber.queue().offer(task) {
            log::warn!(
                "track {} of peer {} not offered to peer {}: {}",
                track.key(),
                self.peer.user_id(),
                subscriber.user_id(),
                err
            );
        }
    }

    async fn subscribe(&mut self, track: Arc<RelayTrack>, publisher: Peer) {
        let user_id = self.peer.user_id();
        let track_key = track.key();

        // the bootstrap snapshot and live fan-out may both deliver a track
        if self.subscriptions.contains_key(&track_key) {
            log::debug!("peer {} already receives track {}", user_id, track_key);
            return;
        }
        if publisher.is_closed() {
            log::debug!("peer {} skips track {} of a departed publisher", user_id, track_key);
            return;
        }

        let line = match self.transport.add_track(track.clone()).await {
            Ok(line) => line,
            Err(err) => {
                log::error!("peer {} failed to add track {}: {}", user_id, track_key, err);
                return;
            }
        };

        self.pending_mids
            .push(track_key, line.clone(), publisher.user_id());
        self.subscriptions.insert(
            track_key,
            Subscription {
                track: track.clone(),
                line,
            },
        );
        track
            .feedback()
            .add_subscriber(user_id, self.peer.max_bandwidth())
            .await;

        self.watch_publisher(track_key, publisher);
        self.negotiate(false).await;
    }

    // Teardown reaches this peer as a task on its own queue.
    fn watch_publisher(&self, track_key: Uuid, publisher: Peer) {
        let subscriber = self.peer.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = publisher.closed() => {
                    if let Err(err) = subscriber.queue().offer(PeerTask::Unsubscribe { track_key }) {
                        log::debug!(
                            "peer {} cannot drop track {}: {}",
                            subscriber.user_id(),
                            track_key,
                            err
                        );
                    }
                }
                _ = subscriber.closed() => {}
            }
        });
    }

    async fn unsubscribe(&mut self, track_key: Uuid) {
        let user_id = self.peer.user_id();
        let subscription = match self.subscriptions.remove(&track_key) {
            Some(subscription) => subscription,
            None => return,
        };

        if self.pending_mids.drop_track(&track_key) {
            log::debug!("peer {} dropped unresolved mapping for {}", user_id, track_key);
        }
        subscription
            .track
            .feedback()
            .remove_subscriber(user_id)
            .await;
        if let Err(err) = self.transport.remove_track(&subscription.line).await {
            log::warn!("peer {} failed to remove track {}: {}", user_id, track_key, err);
        }

        self.negotiate(false).await;
    }

    async fn shutdown(&mut self) {
        let user_id = self.peer.user_id();

        for (_, subscription) in self.subscriptions.drain() {
            subscription
                .track
                .feedback()
                .remove_subscriber(user_id)
                .await;
        }
        for published in self.published.drain(..) {
            if let Err(err) = published.feedback_task.await {
                log::warn!(
                    "peer {} feedback for track {} ended badly: {}",
                    user_id,
                    published.track.key(),
                    err
                );
            }
        }

        log::info!("peer {} task queue stopped", user_id);
    }
}
