use crate::feedback::feedback::Feedback;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

/// The outbound half of a freshly received inbound track, before it is
/// registered with its publisher.
pub(crate) struct InboundTrack {
    pub(crate) local: Arc<TrackLocalStaticRTP>,
    pub(crate) kind: RTPCodecType,
    pub(crate) media_ssrc: u32,
}

impl InboundTrack {
    pub(crate) async fn from_remote(track: &TrackRemote) -> Self {
        let codec = track.codec();
        let local = TrackLocalStaticRTP::new(
            codec.capability,
            track.id(),
            track.stream_id(),
        );
        InboundTrack {
            local: Arc::new(local),
            kind: track.kind(),
            media_ssrc: track.ssrc(),
        }
    }
}

/// One publisher's inbound media, re-exposed to any number of subscribers.
pub struct RelayTrack {
    key: Uuid,
    publisher_id: u32,
    kind: RTPCodecType,
    local: Arc<TrackLocalStaticRTP>,
    feedback: Arc<Feedback>,
}

impl RelayTrack {
    pub(crate) fn new(publisher_id: u32, inbound: InboundTrack, feedback: Arc<Feedback>) -> Self {
        RelayTrack {
            key: Uuid::new_v4(),
            publisher_id,
            kind: inbound.kind,
            local: inbound.local,
            feedback,
        }
    }

    pub fn key(&self) -> Uuid {
        self.key
    }

    pub fn publisher_id(&self) -> u32 {
        self.publisher_id
    }

    pub fn kind(&self) -> RTPCodecType {
        self.kind
    }

    pub(crate) fn local(&self) -> Arc<TrackLocalStaticRTP> {
        self.local.clone()
    }

    pub fn feedback(&self) -> &Arc<Feedback> {
        &self.feedback
    }
}

// Copies packets from the publisher's connection into the relay track until
// the stream ends or the publisher goes away.
pub(crate) async fn forward_rtp(
    user_id: u32,
    remote: Arc<TrackRemote>,
    local: Arc<TrackLocalStaticRTP>,
    token: CancellationToken,
) {
    loop {
        let rv = tokio::select! {
            _ = token.cancelled() => break,
            rv = remote.read_rtp() => rv,
        };

        let pkt = match rv {
            Ok((pkt, _)) => pkt,
            Err(err) => {
                log::info!("peer {} inbound track {} ended: {}", user_id, remote.ssrc(), err);
                break;
            }
        };

        // fails while nobody is bound to the track yet
        if let Err(err) = local.write_rtp(&pkt).await {
            log::debug!("peer {} relay write error, ignoring: {}", user_id, err);
        }
    }
}
