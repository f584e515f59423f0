use crate::sfu::transport::Transport;
use rtcp::packet::Packet as RtcpPacket;
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// Lowest bitrate ever suggested to a publisher.
pub const MIN_BITRATE: u64 = 100_000;

/// Upstream feedback for one relay track: keyframe requests and a
/// bandwidth hint, written on the publisher's own connection.
pub struct Feedback {
    media_ssrc: u32,
    kind: RTPCodecType,
    transport: Arc<dyn Transport>,
    // subscriber user id -> that subscriber's maximum bandwidth
    hints: Mutex<HashMap<u32, u64>>,
}

impl Feedback {
    pub(crate) fn new(media_ssrc: u32, kind: RTPCodecType, transport: Arc<dyn Transport>) -> Self {
        Feedback {
            media_ssrc,
            kind,
            transport,
            hints: Mutex::new(HashMap::new()),
        }
    }

    pub fn media_ssrc(&self) -> u32 {
        self.media_ssrc
    }

    pub fn estimate(max_bandwidth: u64) -> u64 {
        max_bandwidth.max(MIN_BITRATE)
    }

    /// Registers a subscriber and immediately asks for a keyframe carrying
    /// that subscriber's own bandwidth hint, so it doesn't wait a full tick.
    pub async fn add_subscriber(&self, subscriber: u32, max_bandwidth: u64) {
        self.hints.lock().await.insert(subscriber, max_bandwidth);

        let mut pkts = self.key_frame_request();
        pkts.push(self.remb(Feedback::estimate(max_bandwidth)));
        self.write(pkts).await;
    }

    pub async fn remove_subscriber(&self, subscriber: u32) {
        self.hints.lock().await.remove(&subscriber);
    }

    pub async fn subscribers(&self) -> usize {
        self.hints.lock().await.len()
    }

    /// The hint sent on every periodic tick: the highest subscriber
    /// maximum, so a constrained viewer doesn't slow down everybody else.
    pub async fn bitrate(&self) -> Option<u64> {
        self.hints
            .lock()
            .await
            .values()
            .copied()
            .max()
            .map(Feedback::estimate)
    }

    pub async fn request_key_frame(&self) {
        let pkts = self.key_frame_request();
        if !pkts.is_empty() {
            self.write(pkts).await;
        }
    }

    pub(crate) async fn run(self: Arc<Self>, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately; publish already sent a keyframe request
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let mut pkts = self.key_frame_request();
                    if let Some(bitrate) = self.bitrate().await {
                        pkts.push(self.remb(bitrate));
                    }
                    if !pkts.is_empty() {
                        self.write(pkts).await;
                    }
                }
            }
        }
        log::debug!("feedback for ssrc {} stopped", self.media_ssrc);
    }

    fn key_frame_request(&self) -> Vec<Box<dyn RtcpPacket + Send + Sync>> {
        if self.kind != RTPCodecType::Video {
            return Vec::new();
        }
        vec![Box::new(PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc: self.media_ssrc,
        })]
    }

    fn remb(&self, bitrate: u64) -> Box<dyn RtcpPacket + Send + Sync> {
        Box::new(ReceiverEstimatedMaximumBitrate {
            bitrate: bitrate as f32,
            ssrcs: vec![self.media_ssrc],
            ..Default::default()
        })
    }

    async fn write(&self, pkts: Vec<Box<dyn RtcpPacket + Send + Sync>>) {
        if let Err(err) = self.transport.write_rtcp(&pkts[..]).await {
            log::debug!("feedback write for ssrc {} failed: {}", self.media_ssrc, err);
        }
    }
}
