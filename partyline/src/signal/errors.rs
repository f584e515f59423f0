use thiserror::Error;

pub type Result<T> = std::result::Result<T, SignalError>;

#[derive(Error, Debug, PartialEq)]
pub enum SignalError {
    #[error("rtc message is not json: {0}")]
    ErrNotJson(String),
    // an envelope is always a two element array: [type, body]
    #[error("malformed rtc message of length {0}")]
    ErrArity(usize),
    #[error("rtc message is not an array")]
    ErrNotArray,
    #[error("rtc message type is not a string")]
    ErrTypeNotString,
    #[error("unknown rtc message type: {0}")]
    ErrUnknownType(String),
    #[error("failed to unmarshal rtc {kind} payload: {reason}")]
    ErrPayload { kind: &'static str, reason: String },
    #[error("failed to marshal rtc {kind} payload: {reason}")]
    ErrMarshal { kind: &'static str, reason: String },
}
