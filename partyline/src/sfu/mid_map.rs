use super::transport::MediaLine;
use crate::signal::envelope::MapTrack;
use std::sync::Arc;
use uuid::Uuid;

pub(crate) struct PendingMid {
    track_key: Uuid,
    line: Arc<dyn MediaLine>,
    publisher_id: u32,
}

/// Mappings waiting for the next local description to assign their mids.
/// Entries are keyed by relay track so a track removed before its mid
/// resolves never produces a notification.
#[derive(Default)]
pub(crate) struct PendingMids {
    entries: Vec<PendingMid>,
}

impl PendingMids {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, track_key: Uuid, line: Arc<dyn MediaLine>, publisher_id: u32) {
        self.entries.push(PendingMid {
            track_key,
            line,
            publisher_id,
        });
    }

    pub(crate) fn drop_track(&mut self, track_key: &Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.track_key != *track_key);
        before != self.entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    // Must run right after a local description was applied. Lines still
    // without a mid stay pending for the next description.
    pub(crate) async fn resolve(&mut self) -> Vec<MapTrack> {
        let mut mappings = Vec::new();
        let mut unresolved = Vec::new();

        for entry in self.entries.drain(..) {
            match entry.line.mid().await {
                Some(mid) => mappings.push(MapTrack {
                    mid,
                    id: entry.publisher_id,
                }),
                None => {
                    log::debug!(
                        "no mid yet for track {} of publisher {}",
                        entry.track_key,
                        entry.publisher_id
                    );
                    unresolved.push(entry);
                }
            }
        }

        self.entries = unresolved;
        mappings
    }
}
