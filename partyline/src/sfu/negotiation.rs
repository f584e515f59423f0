/// Offer/answer bookkeeping for one peer. Only the peer's task queue worker
/// touches it, so it needs no lock.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NegotiationState {
    making_offer: bool,
    offer_queued: bool,
}

impl NegotiationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn making_offer(&self) -> bool {
        self.making_offer
    }

    pub fn offer_queued(&self) -> bool {
        self.offer_queued
    }

    /// Returns true when the caller should produce an offer now. An ICE
    /// restart always proceeds and supersedes a queued offer.
    pub fn begin_offer(&mut self, ice_restart: bool) -> bool {
        if ice_restart {
            self.making_offer = true;
            self.offer_queued = false;
            return true;
        }
        if self.making_offer {
            self.offer_queued = true;
            return false;
        }
        self.making_offer = true;
        true
    }

    /// The offer was never delivered; a later trigger may try again.
    pub fn offer_failed(&mut self) {
        self.making_offer = false;
    }

    /// Returns true when a queued offer must be sent right away.
    pub fn answer_applied(&mut self) -> bool {
        self.making_offer = false;
        if self.offer_queued {
            self.offer_queued = false;
            return true;
        }
        false
    }
}
