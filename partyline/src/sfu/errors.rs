use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    // ErrPeerClosed the peer's cancellation scope already ended
    #[error("peer is closed")]
    ErrPeerClosed,
    // ErrQueueFull a cross-peer task found the target queue full; the target gets disconnected
    #[error("peer task queue is full")]
    ErrQueueFull,
    // ErrGuestClosed write to a guest whose connection is gone
    #[error("write to closed guest")]
    ErrGuestClosed,
    // ErrGuestBackpressure the guest's outbound queue is full, the guest is dropped
    #[error("guest outbound queue is full, dropping connection")]
    ErrGuestBackpressure,
    #[error("port range must be [start, end]")]
    ErrPortRange,
}

impl Error {
    pub fn equal(&self, err: &anyhow::Error) -> bool {
        err.downcast_ref::<Self>().map_or(false, |e| e == self)
    }
}
