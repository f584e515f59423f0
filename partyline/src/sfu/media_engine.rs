use anyhow::Result;
use sdp::extmap;
use webrtc::api::media_engine::MediaEngine;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecParameters;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpHeaderExtensionCapability;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::RTCPFeedback;

const MIME_TYPE_H264: &'static str = "video/h264";
const MIME_TYPE_OPUS: &'static str = "audio/opus";
const MIME_TYPE_VP8: &'static str = "video/vp8";
const MIME_TYPE_VP9: &'static str = "video/vp9";

// Every peer both publishes and subscribes over one connection, so a single
// engine carries the codecs and extensions for both directions.
pub(super) fn get_media_engine() -> Result<MediaEngine> {
    let mut me = MediaEngine::default();
    me.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: String::from(MIME_TYPE_OPUS),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::from("minptime=10;useinbandfec=1"),
                rtcp_feedback: Vec::new(),
            },
            payload_type: 111,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;

    // keyframe requests and the bandwidth hint both ride on these
    let feedbacks = vec![
        RTCPFeedback {
            typ: String::from("goog-remb"),
            parameter: String::from(""),
        },
        RTCPFeedback {
            typ: String::from("ccm"),
            parameter: String::from("fir"),
        },
        RTCPFeedback {
            typ: String::from("nack"),
            parameter: String::from(""),
        },
        RTCPFeedback {
            typ: String::from("nack"),
            parameter: String::from("pli"),
        },
    ];

    let video_codecs = vec![
        (MIME_TYPE_VP8, "", 96),
        (MIME_TYPE_VP9, "profile-id=0", 98),
        (
            MIME_TYPE_H264,
            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f",
            102,
        ),
        (
            MIME_TYPE_H264,
            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
            125,
        ),
    ];

    for (mime_type, fmtp, payload_type) in video_codecs {
        me.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: String::from(mime_type),
                    clock_rate: 90000,
                    sdp_fmtp_line: String::from(fmtp),
                    rtcp_feedback: feedbacks.clone(),
                    ..Default::default()
                },
                payload_type,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;
    }

    let extensions_video = vec![extmap::SDES_MID_URI, extmap::SDES_RTP_STREAM_ID_URI];

    for extention in extensions_video {
        me.register_header_extension(
            RTCRtpHeaderExtensionCapability {
                uri: String::from(extention),
            },
            RTPCodecType::Video,
            None,
        )?;
    }

    let extensions_audio = vec![
        extmap::SDES_MID_URI,
        extmap::SDES_RTP_STREAM_ID_URI,
        extmap::AUDIO_LEVEL_URI,
    ];

    for extention in extensions_audio {
        me.register_header_extension(
            RTCRtpHeaderExtensionCapability {
                uri: String::from(extention),
            },
            RTPCodecType::Audio,
            None,
        )?;
    }
    Ok(me)
}
