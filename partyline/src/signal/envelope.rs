use super::errors::{Result, SignalError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

pub const OFFER: &'static str = "offer";
pub const ANSWER: &'static str = "answer";
pub const ICE_CANDIDATE: &'static str = "icecandidate";
pub const RENEGOTIATE: &'static str = "renegotiate";
pub const ADD_TRANSCEIVER: &'static str = "addtransceiver";

// client message types carried next to the negotiation envelope
pub const RTC: &'static str = "rtc";
pub const MAP_TRACK: &'static str = "mapTrack";

/// A negotiation message received from a client, decoded from `[type, body]`.
#[derive(Debug, Clone)]
pub enum Inbound {
    Answer(RTCSessionDescription),
    Renegotiate,
    /// `None` is the end-of-candidates marker (`null` body or empty candidate).
    IceCandidate(Option<RTCIceCandidateInit>),
}

/// A negotiation message sent to a client, encoded as `[type, body]`.
#[derive(Debug, Clone)]
pub enum Outbound {
    Offer(RTCSessionDescription),
    Answer(RTCSessionDescription),
    IceCandidate(Option<RTCIceCandidateInit>),
    Renegotiate,
    AddTransceiver(RTPCodecType),
}

impl FromStr for Inbound {
    type Err = SignalError;

    fn from_str(message: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(message)
            .map_err(|err| SignalError::ErrNotJson(err.to_string()))?;
        Inbound::from_value(value)
    }
}

impl Inbound {
    pub fn from_value(message: Value) -> Result<Self> {
        let mut pieces = match message {
            Value::Array(pieces) => pieces,
            _ => return Err(SignalError::ErrNotArray),
        };
        if pieces.len() != 2 {
            return Err(SignalError::ErrArity(pieces.len()));
        }

        let body = pieces.pop().unwrap_or(Value::Null);
        let message_type = match pieces.pop() {
            Some(Value::String(message_type)) => message_type,
            _ => return Err(SignalError::ErrTypeNotString),
        };

        match message_type.as_str() {
            ANSWER => {
                let answer: RTCSessionDescription =
                    serde_json::from_value(body).map_err(|err| SignalError::ErrPayload {
                        kind: ANSWER,
                        reason: err.to_string(),
                    })?;
                Ok(Inbound::Answer(answer))
            }
            RENEGOTIATE => Ok(Inbound::Renegotiate),
            ICE_CANDIDATE => {
                if body.is_null() {
                    return Ok(Inbound::IceCandidate(None));
                }
                let candidate: RTCIceCandidateInit =
                    serde_json::from_value(body).map_err(|err| SignalError::ErrPayload {
                        kind: ICE_CANDIDATE,
                        reason: err.to_string(),
                    })?;
                if candidate.candidate.is_empty() {
                    return Ok(Inbound::IceCandidate(None));
                }
                Ok(Inbound::IceCandidate(Some(candidate)))
            }
            _ => Err(SignalError::ErrUnknownType(message_type)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Answer(_) => ANSWER,
            Inbound::Renegotiate => RENEGOTIATE,
            Inbound::IceCandidate(_) => ICE_CANDIDATE,
        }
    }
}

impl Outbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Offer(_) => OFFER,
            Outbound::Answer(_) => ANSWER,
            Outbound::IceCandidate(_) => ICE_CANDIDATE,
            Outbound::Renegotiate => RENEGOTIATE,
            Outbound::AddTransceiver(_) => ADD_TRANSCEIVER,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        let kind = self.kind();
        let marshal_err = |err: serde_json::Error| SignalError::ErrMarshal {
            kind,
            reason: err.to_string(),
        };

        let body = match self {
            Outbound::Offer(desc) | Outbound::Answer(desc) => {
                serde_json::to_value(desc).map_err(marshal_err)?
            }
            Outbound::IceCandidate(Some(candidate)) => {
                serde_json::to_value(candidate).map_err(marshal_err)?
            }
            Outbound::IceCandidate(None) | Outbound::Renegotiate => Value::Null,
            Outbound::AddTransceiver(codec_type) => Value::String(codec_type.to_string()),
        };

        Ok(Value::Array(vec![Value::String(kind.to_owned()), body]))
    }
}

/// Tells a client which negotiated media line carries which publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapTrack {
    #[serde(rename = "mid")]
    pub mid: String,
    #[serde(rename = "id")]
    pub id: u32,
}

/// The type-tagged object every message to and from a guest travels in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(rename = "body", default)]
    pub body: Value,
}

impl ClientMessage {
    pub fn new<T: Serialize>(message_type: &str, body: &T) -> serde_json::Result<Self> {
        Ok(ClientMessage {
            message_type: message_type.to_owned(),
            body: serde_json::to_value(body)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RtcFrom {
    #[serde(rename = "from")]
    pub from: u32,
    #[serde(rename = "message")]
    pub message: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RtcTo {
    #[serde(rename = "to", default)]
    pub to: u32,
    #[serde(rename = "message")]
    pub message: Value,
}
