//! Reliable delivery for any automaton over a lossy, reordering transport.
//!
//! Outgoing nested messages are grouped per recipient into numbered batches
//! that are retransmitted on timer ticks until the recipient acknowledges
//! them. Acks ride on the next batch going the other way, or travel in an
//! ack-only batch when there is nothing else to send. Received batch ids are
//! remembered so a retransmission never reaches the nested automaton twice.
//!
//! Numbering towards a peer starts only after a reset handshake: the peer
//! reports the highest id it has seen from us and we continue above it, which
//! keeps ids unique across restarts of either side.

mod msg;
mod peer;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{debug, trace, warn};

pub use msg::{
    decode, AckMsg, Batch, Reset, MAX_BATCH_MSGS, MSG_TYPE_ACK_BATCH, MSG_TYPE_ACK_RESET,
};
use peer::PeerState;

use super::{Envelope, Gpa, Message, OutMessages};
use crate::common::{DecodeError, NodeId};

/// Reliability settings.
#[derive(Debug, Clone)]
pub struct AckHandlerConfig {
    /// How long an unacknowledged batch waits before it is sent again.
    pub resend_period: Duration,
}

impl Default for AckHandlerConfig {
    fn default() -> Self {
        AckHandlerConfig {
            resend_period: Duration::from_secs(3),
        }
    }
}

#[derive(Debug)]
pub enum AckInput<I> {
    /// Input for the wrapped automaton.
    Nested(I),
    /// Timer tick, carrying the driver's current time.
    Tick(Duration),
}

type AckOut<G> = OutMessages<AckMsg<<G as Gpa>::Msg>>;

pub struct AckHandler<G: Gpa> {
    me: NodeId,
    nested: G,
    config: AckHandlerConfig,
    peers: BTreeMap<NodeId, PeerState<G::Msg>>,
    dismissed: BTreeSet<NodeId>,
}

impl<G: Gpa> AckHandler<G> {
    pub fn new(me: NodeId, nested: G, config: AckHandlerConfig) -> Self {
        AckHandler {
            me,
            nested,
            config,
            peers: BTreeMap::new(),
            dismissed: BTreeSet::new(),
        }
    }

    pub fn make_tick_input(now: Duration) -> AckInput<G::Input> {
        AckInput::Tick(now)
    }

    /// Forgets everything about a peer that left the committee. Nothing is
    /// sent to it or accepted from it afterwards.
    pub fn dismiss_peer(&mut self, peer: NodeId) {
        if let Some(state) = self.peers.remove(&peer) {
            debug!(
                node = %self.me,
                peer = %peer,
                unacked = state.sent_unacked.len(),
                pending = state.pending.len(),
                "dismissing peer"
            );
        }
        self.dismissed.insert(peer);
    }

    pub fn nested(&self) -> &G {
        &self.nested
    }

    pub fn me(&self) -> NodeId {
        self.me
    }

    /// Batches sent and not acknowledged yet, over all peers.
    pub fn unacked_count(&self) -> usize {
        self.peers.values().map(|p| p.sent_unacked.len()).sum()
    }

    /// Nested messages buffered until a handshake completes.
    pub fn pending_count(&self) -> usize {
        self.peers.values().map(|p| p.pending.len()).sum()
    }

    pub fn is_initialized(&self, peer: &NodeId) -> bool {
        self.peers.get(peer).is_some_and(PeerState::is_initialized)
    }

    fn on_batch(&mut self, batch: Batch<G::Msg>) -> AckOut<G> {
        let from = batch.envelope.sender;
        let peer = self.peers.entry(from).or_default();
        for ack in &batch.acks {
            if peer.acked(*ack) {
                trace!(node = %self.me, peer = %from, batch_id = ack, "batch acknowledged");
            }
        }

        let Some(id) = batch.id else {
            return OutMessages::new();
        };
        if peer.answered_reset.and_then(|answered| answered.checked_add(1)) == Some(id) {
            trace!(node = %self.me, peer = %from, batch_id = id, "peer numbering restarted");
            peer.forget_previous_incarnation();
        }
        if !peer.received.insert(id) {
            return self.on_duplicate(from, id);
        }

        trace!(node = %self.me, peer = %from, batch_id = id, msgs = batch.msgs.len(), "batch received");
        let mut out = OutMessages::new();
        for mut msg in batch.msgs {
            msg.set_sender(from);
            msg.set_recipient(self.me);
            out.add_all(self.nested.message(msg));
        }
        self.send_round(out, Some((from, id)))
    }

    /// The peer sent a batch again, so it has not seen our ack. Resend the
    /// batch that carried the ack while we still hold it, otherwise ack alone.
    /// A resent carrier is restamped by the next tick, so its resend period
    /// starts over.
    fn on_duplicate(&mut self, from: NodeId, id: u32) -> AckOut<G> {
        let carrier = self.peers.get_mut(&from).and_then(|p| {
            let carrier = p.acked_in.get(&id).copied()?;
            p.sent_unacked.get_mut(&carrier)
        });

        let mut out = OutMessages::new();
        match carrier {
            Some(batch) => {
                debug!(node = %self.me, peer = %from, batch_id = id, carrier = ?batch.id, "duplicate batch, resending carrier");
                batch.sent_at = None;
                out.add(AckMsg::Batch(batch.clone()));
            }
            None => {
                debug!(node = %self.me, peer = %from, batch_id = id, "duplicate batch, acking again");
                out.add(AckMsg::Batch(Batch::ack_only(from, vec![id])));
            }
        }
        out
    }

    fn on_reset(&mut self, reset: Reset) -> AckOut<G> {
        let from = reset.envelope.sender;
        let mut out = OutMessages::new();

        if !reset.is_response {
            let peer = self.peers.entry(from).or_default();
            let latest = peer.received.latest();
            peer.answered_reset = Some(latest);
            trace!(node = %self.me, peer = %from, latest, "answering reset");
            out.add(AckMsg::Reset(Reset::response(from, latest)));
            return out;
        }

        let peer = self.peers.entry(from).or_default();
        if peer.is_initialized() {
            trace!(node = %self.me, peer = %from, "ignoring reset response, already initialized");
            return out;
        }
        let Some(next) = reset.latest_id.checked_add(1) else {
            warn!(node = %self.me, peer = %from, "reset response leaves no batch ids");
            return out;
        };
        debug!(node = %self.me, peer = %from, next_id = next, "peer initialized");
        peer.next_id = Some(next);
        peer.reset_sent = false;

        let pending: OutMessages<G::Msg> = std::mem::take(&mut peer.pending).into_iter().collect();
        self.send_round(pending, None)
    }

    fn on_tick(&mut self, now: Duration) -> AckOut<G> {
        let cutoff = now.checked_sub(self.config.resend_period);
        let mut out = OutMessages::new();

        for (peer_id, peer) in self.peers.iter_mut() {
            for batch in peer.sent_unacked.values_mut() {
                match batch.sent_at {
                    None => batch.sent_at = Some(now),
                    Some(at) if cutoff.is_some_and(|c| at < c) => {
                        trace!(node = %self.me, peer = %peer_id, batch_id = ?batch.id, "resending batch");
                        batch.sent_at = Some(now);
                        out.add(AckMsg::Batch(batch.clone()));
                    }
                    Some(_) => {}
                }
            }
            if !peer.is_initialized() && (peer.reset_sent || !peer.pending.is_empty()) {
                peer.reset_sent = true;
                out.add(AckMsg::Reset(Reset::request(*peer_id)));
            }
        }
        out
    }

    /// Turns nested output into one batch per recipient, attaching the ack
    /// owed for the batch being processed, if any.
    fn send_round(&mut self, out: OutMessages<G::Msg>, owed: Option<(NodeId, u32)>) -> AckOut<G> {
        let mut grouped = out.by_recipient();
        if let Some((peer_id, _)) = owed {
            grouped.entry(peer_id).or_default();
        }

        let mut result = OutMessages::new();
        for (peer_id, msgs) in grouped {
            if self.dismissed.contains(&peer_id) {
                debug!(node = %self.me, peer = %peer_id, dropped = msgs.len(), "not sending to dismissed peer");
                continue;
            }
            let mut acks: Vec<u32> = match owed {
                Some((owed_to, id)) if owed_to == peer_id => vec![id],
                _ => Vec::new(),
            };

            let peer = self.peers.entry(peer_id).or_default();
            // The message count is a u16 on the wire, so long runs are split.
            let mut msgs = msgs.into_iter().peekable();
            while msgs.peek().is_some() {
                let Some(id) = peer.take_next_id() else {
                    peer.pending.extend(msgs);
                    if !peer.reset_sent {
                        peer.reset_sent = true;
                        result.add(AckMsg::Reset(Reset::request(peer_id)));
                    }
                    break;
                };
                for ack in &acks {
                    peer.acked_in.insert(*ack, id);
                }
                let batch = Batch {
                    envelope: Envelope::to(peer_id),
                    id: Some(id),
                    msgs: msgs.by_ref().take(MAX_BATCH_MSGS).collect(),
                    acks: std::mem::take(&mut acks),
                    sent_at: None,
                };
                peer.sent_unacked.insert(id, batch.clone());
                result.add(AckMsg::Batch(batch));
            }
            if !acks.is_empty() {
                result.add(AckMsg::Batch(Batch::ack_only(peer_id, acks)));
            }
        }
        result
    }
}

impl<G: Gpa> Gpa for AckHandler<G> {
    type Input = AckInput<G::Input>;
    type Output = G::Output;
    type Msg = AckMsg<G::Msg>;

    fn input(&mut self, input: Self::Input) -> OutMessages<Self::Msg> {
        match input {
            AckInput::Nested(input) => {
                let out = self.nested.input(input);
                self.send_round(out, None)
            }
            AckInput::Tick(now) => self.on_tick(now),
        }
    }

    fn message(&mut self, msg: Self::Msg) -> OutMessages<Self::Msg> {
        let from = msg.sender();
        if self.dismissed.contains(&from) {
            debug!(node = %self.me, peer = %from, "dropping message from dismissed peer");
            return OutMessages::new();
        }
        match msg {
            AckMsg::Batch(batch) => self.on_batch(batch),
            AckMsg::Reset(reset) => self.on_reset(reset),
        }
    }

    fn output(&self) -> Option<&Self::Output> {
        self.nested.output()
    }

    fn unmarshal_message(&self, data: &[u8]) -> Result<Self::Msg, DecodeError> {
        decode(data, |inner| self.nested.unmarshal_message(inner))
    }

    fn status_string(&self) -> String {
        let initialized = self.peers.values().filter(|p| p.is_initialized()).count();
        format!(
            "{{AckHandler: me={}, peers={}/{} initialized, unacked={}, pending={}, nested={}}}",
            self.me,
            initialized,
            self.peers.len(),
            self.unacked_count(),
            self.pending_count(),
            self.nested.status_string(),
        )
    }
}
