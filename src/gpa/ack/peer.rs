use std::collections::{BTreeMap, BTreeSet};

use super::msg::Batch;

/// Batch ids seen from one peer: everything up to `watermark` plus the
/// sparse set above it.
#[derive(Debug, Default)]
pub(super) struct ReceivedIds {
    pub(super) watermark: u32,
    pub(super) above: BTreeSet<u32>,
}

impl ReceivedIds {
    pub fn contains(&self, id: u32) -> bool {
        id <= self.watermark || self.above.contains(&id)
    }

    /// Returns false if the id was already recorded.
    pub fn insert(&mut self, id: u32) -> bool {
        if self.contains(id) {
            return false;
        }
        self.above.insert(id);
        self.compact();
        true
    }

    /// Treats every id up to `id` as received.
    pub fn forget_through(&mut self, id: u32) {
        self.watermark = self.watermark.max(id);
        self.above = match id.checked_add(1) {
            Some(next) => self.above.split_off(&next),
            None => BTreeSet::new(),
        };
        self.compact();
    }

    fn compact(&mut self) {
        while let Some(next) = self.watermark.checked_add(1) {
            if !self.above.remove(&next) {
                break;
            }
            self.watermark = next;
        }
    }

    /// Highest id ever received, 0 if none.
    pub fn latest(&self) -> u32 {
        self.above.last().copied().unwrap_or(self.watermark)
    }
}

/// Everything the handler tracks about one peer.
#[derive(Debug)]
pub(super) struct PeerState<M> {
    /// Next batch id to assign. `None` until the reset handshake completes.
    pub next_id: Option<u32>,
    /// A reset request is outstanding.
    pub reset_sent: bool,
    /// Nested messages waiting for the handshake.
    pub pending: Vec<M>,
    pub sent_unacked: BTreeMap<u32, Batch<M>>,
    pub received: ReceivedIds,
    /// Peer's batch id -> our batch that carried the ack for it.
    pub acked_in: BTreeMap<u32, u32>,
    /// Latest id we reported in a reset response. The peer numbers above
    /// it once it restarts.
    pub answered_reset: Option<u32>,
}

impl<M> Default for PeerState<M> {
    fn default() -> Self {
        PeerState {
            next_id: None,
            reset_sent: false,
            pending: Vec::new(),
            sent_unacked: BTreeMap::new(),
            received: ReceivedIds::default(),
            acked_in: BTreeMap::new(),
            answered_reset: None,
        }
    }
}

impl<M> PeerState<M> {
    pub fn is_initialized(&self) -> bool {
        self.next_id.is_some()
    }

    /// Marks one of our batches as delivered.
    pub fn acked(&mut self, id: u32) -> bool {
        if self.sent_unacked.remove(&id).is_none() {
            return false;
        }
        // The peer has that batch, and with it every ack it carried.
        self.acked_in.retain(|_, carrier| *carrier != id);
        true
    }

    /// The peer's first batch after our last reset answer arrived. Ids up to
    /// that answer belong to its previous run; the missing ones never arrive.
    pub fn forget_previous_incarnation(&mut self) {
        if let Some(answered) = self.answered_reset.take() {
            self.received.forget_through(answered);
            self.acked_in.retain(|id, _| *id > answered);
        }
    }

    pub fn take_next_id(&mut self) -> Option<u32> {
        let id = self.next_id?;
        let Some(next) = id.checked_add(1) else {
            panic!("AckHandler: batch id space exhausted");
        };
        self.next_id = Some(next);
        Some(id)
    }
}
