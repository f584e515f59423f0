use super::errors::{Error, Result};
use super::party_line::PartyLine;
use super::peer::{Peer, PeerHandle};
use crate::signal::envelope::{ClientMessage, MapTrack, Outbound, RtcFrom, RtcTo, MAP_TRACK, RTC};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

pub const GUEST_QUEUE_CAPACITY: usize = 100;

// relay negotiation always appears to come from user 0
const RELAY_USER_ID: u32 = 0;

/// One connected client as the guest registry sees it: a cancellation
/// scope bound to the connection and a bounded outbound message queue
/// drained by the connection's writer.
#[derive(Clone)]
pub struct Guest {
    user_id: u32,
    token: CancellationToken,
    tx: mpsc::Sender<ClientMessage>,
}

impl Guest {
    pub fn new(user_id: u32, parent: &CancellationToken) -> (Self, mpsc::Receiver<ClientMessage>) {
        Guest::with_capacity(user_id, parent, GUEST_QUEUE_CAPACITY)
    }

    pub fn with_capacity(
        user_id: u32,
        parent: &CancellationToken,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ClientMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let guest = Guest {
            user_id,
            token: parent.child_token(),
            tx,
        };
        (guest, rx)
    }

    pub fn user_id(&self) -> u32 {
        self.user_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Ends the guest's scope, which also tears down its peer.
    pub fn disconnect(&self) {
        self.token.cancel();
    }

    /// Never blocks: a guest that cannot keep up is disconnected.
    pub fn write(&self, message: ClientMessage) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::ErrGuestClosed);
        }
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(message)) => {
                log::warn!(
                    "guest {} is not reading, dropping {} and disconnecting",
                    self.user_id,
                    message.message_type
                );
                self.token.cancel();
                Err(Error::ErrGuestBackpressure)
            }
            Err(TrySendError::Closed(_)) => Err(Error::ErrGuestClosed),
        }
    }

    pub fn peer_handle(&self, max_bandwidth: Option<u64>) -> PeerHandle {
        let signal_guest = self.clone();
        let map_guest = self.clone();

        PeerHandle {
            user_id: self.user_id,
            max_bandwidth,
            send_to_peer: Box::new(move |message: Outbound| {
                let guest = signal_guest.clone();
                Box::pin(async move {
                    guest.write_rtc(&message);
                })
            }),
            map_track: Box::new(move |mapping: MapTrack| {
                let guest = map_guest.clone();
                Box::pin(async move {
                    match ClientMessage::new(MAP_TRACK, &mapping) {
                        Ok(message) => {
                            if let Err(err) = guest.write(message) {
                                log::debug!("guest {} mapTrack not sent: {}", guest.user_id, err);
                            }
                        }
                        Err(err) => log::error!("mapTrack marshal error: {}", err),
                    }
                })
            }),
        }
    }

    fn write_rtc(&self, message: &Outbound) {
        let wrapped = match message.to_value() {
            Ok(wrapped) => wrapped,
            Err(err) => {
                log::error!("guest {} {}", self.user_id, err);
                return;
            }
        };
        let rtc = RtcFrom {
            from: RELAY_USER_ID,
            message: wrapped,
        };
        match ClientMessage::new(RTC, &rtc) {
            Ok(message) => {
                if let Err(err) = self.write(message) {
                    log::debug!("guest {} rtc message not sent: {}", self.user_id, err);
                }
            }
            Err(err) => log::error!("rtc marshal error: {}", err),
        }
    }

    /// Registers this guest with the party line under the given role.
    pub async fn join(&self, party_line: &PartyLine, role: &str) -> anyhow::Result<Peer> {
        let max_bandwidth = party_line.config().bandwidth_for_role(role);
        party_line
            .add_peer(self.token.clone(), self.peer_handle(Some(max_bandwidth)))
            .await
    }

    /// Hands the body of an inbound `rtc` client message to the peer.
    /// Nothing here is fatal to the connection.
    pub async fn route_rtc(&self, peer: &Peer, body: Value) {
        let rtc: RtcTo = match serde_json::from_value(body) {
            Ok(rtc) => rtc,
            Err(err) => {
                log::warn!("bad rtc message from guest {}: {}", self.user_id, err);
                return;
            }
        };
        if let Err(err) = peer.handle_message(rtc.message).await {
            log::warn!("malformed rtc message from guest {}: {}", self.user_id, err);
        }
    }
}
