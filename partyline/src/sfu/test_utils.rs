use super::config::RelayConfig;
use super::party_line::PartyLine;
use super::peer::PeerHandle;
use super::relay_track::{InboundTrack, RelayTrack};
use super::task_queue::{PeerTask, TaskQueue};
use super::transport::{Connector, MediaLine, PeerWiring, Transport};
use crate::signal::envelope::{MapTrack, Outbound};
use anyhow::Result;
use async_trait::async_trait;
use rtcp::packet::Packet as RtcpPacket;
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use serde_json::json;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

pub(crate) fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Lets every runnable task finish. Tests run on a paused clock, so the
/// sleep only completes once the runtime is otherwise idle.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Rtcp {
    Pli(u32),
    Remb { bitrate: u64, ssrcs: Vec<u32> },
}

pub(crate) struct MockLine {
    pub(crate) track_key: Uuid,
    mid: Mutex<Option<String>>,
}

impl MockLine {
    pub(crate) fn new(track_key: Uuid) -> Self {
        MockLine {
            track_key,
            mid: Mutex::new(None),
        }
    }

    pub(crate) async fn set_mid(&self, mid: &str) {
        *self.mid.lock().await = Some(String::from(mid));
    }
}

#[async_trait]
impl MediaLine for MockLine {
    async fn mid(&self) -> Option<String> {
        self.mid.lock().await.clone()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

#[derive(Default)]
pub(crate) struct MockState {
    pub(crate) offers: usize,
    pub(crate) ice_restarts: usize,
    pub(crate) local_descriptions: usize,
    pub(crate) remote_descriptions: usize,
    pub(crate) candidates: Vec<RTCIceCandidateInit>,
    pub(crate) lines: Vec<Arc<MockLine>>,
    pub(crate) removed: Vec<Uuid>,
    pub(crate) rtcp: Vec<Rtcp>,
    pub(crate) closed: bool,
    pub(crate) fail_offers: usize,
    next_mid: usize,
}

/// Records what the relay asks of a connection and assigns mids on
/// `set_local_description` the way a peer connection does.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub(crate) state: Mutex<MockState>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(MockTransport::default())
    }

    pub(crate) async fn active_tracks(&self) -> Vec<Uuid> {
        let state = self.state.lock().await;
        state
            .lines
            .iter()
            .map(|line| line.track_key)
            .filter(|key| !state.removed.contains(key))
            .collect()
    }

    pub(crate) async fn rtcp(&self) -> Vec<Rtcp> {
        self.state.lock().await.rtcp.clone()
    }

    pub(crate) async fn clear_rtcp(&self) {
        self.state.lock().await.rtcp.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn add_track(&self, track: Arc<RelayTrack>) -> Result<Arc<dyn MediaLine>> {
        let line = Arc::new(MockLine::new(track.key()));
        self.state.lock().await.lines.push(line.clone());
        Ok(line)
    }

    async fn remove_track(&self, line: &Arc<dyn MediaLine>) -> Result<()> {
        if let Some(line) = line.as_any().downcast_ref::<MockLine>() {
            self.state.lock().await.removed.push(line.track_key);
        }
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<RTCSessionDescription> {
        let mut state = self.state.lock().await;
        if state.fail_offers > 0 {
            state.fail_offers -= 1;
            return Err(anyhow::anyhow!("offer creation failed"));
        }
        state.offers += 1;
        if ice_restart {
            state.ice_restarts += 1;
        }
        let mut offer = RTCSessionDescription::default();
        offer.sdp_type = RTCSdpType::Offer;
        offer.sdp = format!("v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\n", state.offers);
        Ok(offer)
    }

    async fn set_local_description(&self, _desc: RTCSessionDescription) -> Result<()> {
        let mut state = self.state.lock().await;
        state.local_descriptions += 1;
        let lines = state.lines.clone();
        for line in lines {
            if line.mid().await.is_none() {
                let mid = state.next_mid.to_string();
                state.next_mid += 1;
                line.set_mid(&mid).await;
            }
        }
        Ok(())
    }

    async fn set_remote_description(&self, _desc: RTCSessionDescription) -> Result<()> {
        self.state.lock().await.remote_descriptions += 1;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.state.lock().await.candidates.push(candidate);
        Ok(())
    }

    async fn write_rtcp(&self, pkts: &[Box<dyn RtcpPacket + Send + Sync>]) -> Result<()> {
        let mut state = self.state.lock().await;
        for pkt in pkts {
            let pkt = pkt.as_any();
            if let Some(pli) = pkt.downcast_ref::<PictureLossIndication>() {
                state.rtcp.push(Rtcp::Pli(pli.media_ssrc));
            } else if let Some(remb) = pkt.downcast_ref::<ReceiverEstimatedMaximumBitrate>() {
                state.rtcp.push(Rtcp::Remb {
                    bitrate: remb.bitrate as u64,
                    ssrcs: remb.ssrcs.clone(),
                });
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().await.closed = true;
        Ok(())
    }
}

struct Wired {
    transport: Arc<MockTransport>,
    queue: TaskQueue,
}

/// Hands out a `MockTransport` per user id and can play the connection's
/// own events (inbound tracks, ice failure) into the peer.
#[derive(Default)]
pub(crate) struct MockConnector {
    fail: bool,
    wired: Mutex<HashMap<u32, Wired>>,
}

impl MockConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(MockConnector::default())
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(MockConnector {
            fail: true,
            ..Default::default()
        })
    }

    pub(crate) async fn transport(&self, user_id: u32) -> Arc<MockTransport> {
        match self.wired.lock().await.get(&user_id) {
            Some(wired) => wired.transport.clone(),
            None => panic!("peer {} never connected", user_id),
        }
    }

    pub(crate) async fn publish(&self, user_id: u32, kind: RTPCodecType, media_ssrc: u32) {
        let queue = match self.wired.lock().await.get(&user_id) {
            Some(wired) => wired.queue.clone(),
            None => panic!("peer {} never connected", user_id),
        };
        let mime_type = match kind {
            RTPCodecType::Audio => "audio/opus",
            _ => "video/vp8",
        };
        let local = TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: String::from(mime_type),
                ..Default::default()
            },
            format!("track-{}", media_ssrc),
            format!("stream-{}", user_id),
        );
        let inbound = InboundTrack {
            local: Arc::new(local),
            kind,
            media_ssrc,
        };
        queue.push(PeerTask::Publish(inbound)).await.unwrap();
    }

    pub(crate) async fn ice_failed(&self, user_id: u32) {
        let queue = match self.wired.lock().await.get(&user_id) {
            Some(wired) => wired.queue.clone(),
            None => panic!("peer {} never connected", user_id),
        };
        queue
            .push(PeerTask::Negotiate { ice_restart: true })
            .await
            .unwrap();
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, wiring: PeerWiring) -> Result<Arc<dyn Transport>> {
        if self.fail {
            return Err(anyhow::anyhow!("cannot create peer connection"));
        }
        let transport = MockTransport::new();
        self.wired.lock().await.insert(
            wiring.user_id,
            Wired {
                transport: transport.clone(),
                queue: wiring.queue,
            },
        );
        Ok(transport)
    }
}

/// The client side of one peer: everything the relay sent it.
#[derive(Clone, Default)]
pub(crate) struct MockClient {
    pub(crate) signals: Arc<Mutex<Vec<Outbound>>>,
    pub(crate) mappings: Arc<Mutex<Vec<MapTrack>>>,
}

impl MockClient {
    pub(crate) fn new() -> Self {
        MockClient::default()
    }

    pub(crate) fn handle(&self, user_id: u32, max_bandwidth: Option<u64>) -> PeerHandle {
        let signals_out = self.signals.clone();
        let mappings_out = self.mappings.clone();
        PeerHandle {
            user_id,
            max_bandwidth,
            send_to_peer: Box::new(move |message: Outbound| {
                let signals_in = signals_out.clone();
                Box::pin(async move {
                    signals_in.lock().await.push(message);
                })
            }),
            map_track: Box::new(move |mapping: MapTrack| {
                let mappings_in = mappings_out.clone();
                Box::pin(async move {
                    mappings_in.lock().await.push(mapping);
                })
            }),
        }
    }

    pub(crate) async fn offers(&self) -> usize {
        self.signals
            .lock()
            .await
            .iter()
            .filter(|message| matches!(message, Outbound::Offer(_)))
            .count()
    }

    pub(crate) async fn mappings(&self) -> Vec<MapTrack> {
        self.mappings.lock().await.clone()
    }
}

pub(crate) fn answer() -> serde_json::Value {
    json!(["answer", {"type": "answer", "sdp": "v=0\r\n"}])
}

pub(crate) fn test_party_line(connector: Arc<MockConnector>) -> PartyLine {
    PartyLine::with_connector(RelayConfig::default(), connector)
}
