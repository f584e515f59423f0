use super::config::Config;
use super::media_engine;
use super::peer::{send_signal, OnSignalFn};
use super::relay_track::{forward_rtp, InboundTrack, RelayTrack};
use super::task_queue::{PeerTask, TaskQueue};
use crate::signal::envelope::Outbound;
use anyhow::Result;
use async_trait::async_trait;
use interceptor::registry::Registry;
use rtcp::packet::Packet as RtcpPacket;
use rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

pub const DATA_CHANNEL_LABEL: &'static str = "data";

/// A negotiated media line carrying one relay track to a subscriber.
#[async_trait]
pub(crate) trait MediaLine: Send + Sync {
    /// `None` until a local description assigned the line a mid.
    async fn mid(&self) -> Option<String>;
    fn as_any(&self) -> &(dyn Any + Send + Sync);
}

/// The parts of a peer connection the relay drives.
#[async_trait]
pub(crate) trait Transport: Send + Sync {
    async fn add_track(&self, track: Arc<RelayTrack>) -> Result<Arc<dyn MediaLine>>;
    async fn remove_track(&self, line: &Arc<dyn MediaLine>) -> Result<()>;
    async fn create_offer(&self, ice_restart: bool) -> Result<RTCSessionDescription>;
    async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()>;
    async fn write_rtcp(&self, pkts: &[Box<dyn RtcpPacket + Send + Sync>]) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// What a new connection reports back into: its peer's queue and client.
pub(crate) struct PeerWiring {
    pub(crate) user_id: u32,
    pub(crate) token: CancellationToken,
    pub(crate) queue: TaskQueue,
    pub(crate) on_signal: Arc<Mutex<OnSignalFn>>,
}

/// Creates the connection for a peer joining the party line.
#[async_trait]
pub(crate) trait Connector: Send + Sync {
    async fn connect(&self, wiring: PeerWiring) -> Result<Arc<dyn Transport>>;
}

struct TransceiverLine {
    transceiver: Arc<RTCRtpTransceiver>,
}

#[async_trait]
impl MediaLine for TransceiverLine {
    async fn mid(&self) -> Option<String> {
        let mid = self.transceiver.mid().map(|mid| mid.to_string()).unwrap_or_default();
        if mid.is_empty() {
            return None;
        }
        Some(mid)
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

pub(crate) struct WebRTCTransport {
    user_id: u32,
    pc: Arc<RTCPeerConnection>,
}

impl WebRTCTransport {
    // Turns the subscriber's keyframe requests into requests to the publisher.
    async fn relay_key_frame_requests(
        user_id: u32,
        sender: Arc<RTCRtpSender>,
        track: Arc<RelayTrack>,
    ) {
        loop {
            let pkts = match sender.read_rtcp().await {
                Ok((pkts, _)) => pkts,
                Err(err) => {
                    log::debug!("peer {} rtcp reader for track {} done: {}", user_id, track.key(), err);
                    return;
                }
            };

            let wants_key_frame = pkts.iter().any(|pkt| {
                let pkt = pkt.as_any();
                pkt.downcast_ref::<PictureLossIndication>().is_some()
                    || pkt.downcast_ref::<FullIntraRequest>().is_some()
            });
            if wants_key_frame {
                track.feedback().request_key_frame().await;
            }
        }
    }
}

#[async_trait]
impl Transport for WebRTCTransport {
    async fn add_track(&self, track: Arc<RelayTrack>) -> Result<Arc<dyn MediaLine>> {
        let local = track.local() as Arc<dyn TrackLocal + Send + Sync>;
        let transceiver = self
            .pc
            .add_transceiver_from_track(
                local,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: Vec::new(),
                }),
            )
            .await?;

        let sender = transceiver.sender().await;
        tokio::spawn(WebRTCTransport::relay_key_frame_requests(
            self.user_id,
            sender,
            track,
        ));

        Ok(Arc::new(TransceiverLine { transceiver }))
    }

    async fn remove_track(&self, line: &Arc<dyn MediaLine>) -> Result<()> {
        if let Some(line) = line.as_any().downcast_ref::<TransceiverLine>() {
            let sender = line.transceiver.sender().await;
            self.pc.remove_track(&sender).await?;
        }
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<RTCSessionDescription> {
        let options = if ice_restart {
            Some(RTCOfferOptions {
                ice_restart: true,
                ..Default::default()
            })
        } else {
            None
        };
        Ok(self.pc.create_offer(options).await?)
    }

    async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()> {
        Ok(self.pc.set_local_description(desc).await?)
    }

    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        Ok(self.pc.set_remote_description(desc).await?)
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        Ok(self.pc.add_ice_candidate(candidate).await?)
    }

    async fn write_rtcp(&self, pkts: &[Box<dyn RtcpPacket + Send + Sync>]) -> Result<()> {
        self.pc.write_rtcp(pkts).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(self.pc.close().await?)
    }
}

pub(crate) struct WebRTCConnector {
    setting: SettingEngine,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRTCConnector {
    pub(crate) fn new(config: &Config) -> Result<Self> {
        Ok(WebRTCConnector {
            setting: config.webrtc.setting_engine()?,
            ice_servers: config.webrtc.ice_servers(),
        })
    }

    async fn wire(pc: &Arc<RTCPeerConnection>, wiring: PeerWiring) -> Result<()> {
        for kind in vec![RTPCodecType::Audio, RTPCodecType::Video] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: Vec::new(),
                }),
            )
            .await?;
        }
        pc.create_data_channel(DATA_CHANNEL_LABEL, None).await?;

        let user_id = wiring.user_id;

        let on_signal_out = wiring.on_signal.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let on_signal_in = on_signal_out.clone();
            Box::pin(async move {
                let init = match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => Some(init),
                        Err(err) => {
                            log::error!("peer {} candidate to json error: {}", user_id, err);
                            return;
                        }
                    },
                    // gathering finished
                    None => None,
                };
                send_signal(&on_signal_in, Outbound::IceCandidate(init)).await;
            })
        }));

        let queue_out = wiring.queue.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let queue_in = queue_out.clone();
            Box::pin(async move {
                log::info!("peer {} ice connection state: {}", user_id, state);
                if state == RTCIceConnectionState::Failed {
                    if let Err(err) = queue_in.push(PeerTask::Negotiate { ice_restart: true }).await {
                        log::warn!("peer {} ice restart not queued: {}", user_id, err);
                    }
                }
            })
        }));

        let queue_out = wiring.queue.clone();
        let token_out = wiring.token.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let queue_in = queue_out.clone();
                let token_in = token_out.clone();
                Box::pin(async move {
                    let inbound = InboundTrack::from_remote(&track).await;
                    log::info!(
                        "peer {} publishes {} track {}",
                        user_id,
                        inbound.kind,
                        inbound.media_ssrc
                    );
                    tokio::spawn(forward_rtp(
                        user_id,
                        track,
                        inbound.local.clone(),
                        token_in,
                    ));
                    if let Err(err) = queue_in.push(PeerTask::Publish(inbound)).await {
                        log::warn!("peer {} track not published: {}", user_id, err);
                    }
                })
            },
        ));

        Ok(())
    }
}

#[async_trait]
impl Connector for WebRTCConnector {
    async fn connect(&self, wiring: PeerWiring) -> Result<Arc<dyn Transport>> {
        let mut me = media_engine::get_media_engine()?;
        let registry = register_default_interceptors(Registry::new(), &mut me)?;

        let api = APIBuilder::new()
            .with_media_engine(me)
            .with_setting_engine(self.setting.clone())
            .with_interceptor_registry(registry)
            .build();

        let configuration = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(configuration).await?);

        let user_id = wiring.user_id;
        if let Err(err) = WebRTCConnector::wire(&pc, wiring).await {
            if let Err(close_err) = pc.close().await {
                log::warn!("peer {} close after failed setup: {}", user_id, close_err);
            }
            return Err(err);
        }

        Ok(Arc::new(WebRTCTransport { user_id, pc }))
    }
}
