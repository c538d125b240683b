//! Deterministic, single-threaded simulation of a committee of automata.
//!
//! All nodes live in one process. Messages go through one FIFO queue and are
//! delivered one at a time; whatever the recipient emits is queued behind
//! them. With the same nodes, inputs and seed a run is exactly reproducible.
//! Optional message loss (seeded) and wire-codec round trips make it useful
//! for exercising the reliability layer and the decoders as well.

use std::collections::{BTreeMap, VecDeque};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use super::{Gpa, Message};
use crate::common::NodeId;

pub struct TestContext<G: Gpa> {
    nodes: BTreeMap<NodeId, G>,
    inputs: VecDeque<(NodeId, G::Input)>,
    queue: VecDeque<G::Msg>,
    delivery_probability: f64,
    rng: ChaCha8Rng,
    wire_codec: bool,
    sent_log: Option<Vec<(NodeId, NodeId, Vec<u8>)>>,
    delivered: u64,
    dropped: u64,
}

impl<G: Gpa> TestContext<G> {
    pub fn new(nodes: BTreeMap<NodeId, G>) -> Self {
        TestContext {
            nodes,
            inputs: VecDeque::new(),
            queue: VecDeque::new(),
            delivery_probability: 1.0,
            rng: ChaCha8Rng::seed_from_u64(0),
            wire_codec: false,
            sent_log: None,
            delivered: 0,
            dropped: 0,
        }
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = (NodeId, G::Input)>) -> Self {
        self.add_inputs(inputs);
        self
    }

    /// Each message is delivered with probability `p`, decided by an RNG
    /// seeded with `seed`.
    pub fn with_message_delivery_probability(mut self, p: f64, seed: u64) -> Self {
        self.delivery_probability = p;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Sends every message through `marshal` and the recipient's
    /// `unmarshal_message` before delivering it.
    pub fn with_wire_codec(mut self, enabled: bool) -> Self {
        self.wire_codec = enabled;
        self
    }

    /// Records sender, recipient and encoding of every emitted message.
    pub fn with_sent_log(mut self) -> Self {
        self.sent_log = Some(Vec::new());
        self
    }

    /// Inputs are applied in the given order, before any queued message.
    pub fn add_inputs(&mut self, inputs: impl IntoIterator<Item = (NodeId, G::Input)>) {
        self.inputs.extend(inputs);
    }

    /// Runs until no input and no message is left.
    pub fn run_all(&mut self) {
        while self.step() {}
    }

    /// Runs at most `max` steps. Returns false if the queue drained first.
    pub fn run_steps(&mut self, max: usize) -> bool {
        for _ in 0..max {
            if !self.step() {
                return false;
            }
        }
        true
    }

    /// Runs until `done` holds or nothing is left to process. Returns
    /// whether `done` holds at the end.
    pub fn run_until(&mut self, mut done: impl FnMut(&Self) -> bool) -> bool {
        loop {
            if done(self) {
                return true;
            }
            if !self.step() {
                return done(self);
            }
        }
    }

    /// Processes one input, or else one message.
    fn step(&mut self) -> bool {
        if let Some((id, input)) = self.inputs.pop_front() {
            let node = self.node_mut(&id);
            let out = node.input(input);
            trace!(node = %id, emitted = out.count(), "input applied");
            self.enqueue_from(id, out);
            return true;
        }

        let Some(msg) = self.queue.pop_front() else {
            return false;
        };
        if self.delivery_probability < 1.0 && !self.rng.gen_bool(self.delivery_probability) {
            self.dropped += 1;
            trace!(to = %msg.recipient(), "message dropped");
            return true;
        }

        let to = msg.recipient();
        let from = msg.sender();
        let Some(node) = self.nodes.get_mut(&to) else {
            debug!(to = %to, "message for unknown node discarded");
            return true;
        };
        let msg = if self.wire_codec {
            let mut decoded = match node.unmarshal_message(&msg.marshal()) {
                Ok(decoded) => decoded,
                Err(e) => panic!("TestContext: message {msg:?} does not decode: {e}"),
            };
            decoded.set_sender(from);
            decoded.set_recipient(to);
            decoded
        } else {
            msg
        };
        self.delivered += 1;
        let out = node.message(msg);
        self.enqueue_from(to, out);
        true
    }

    /// Routes the output of an external call on a node (e.g. a dismissal
    /// side effect) into the queue, stamped with that node as sender.
    pub fn enqueue_from(&mut self, from: NodeId, msgs: impl IntoIterator<Item = G::Msg>) {
        for mut msg in msgs {
            msg.set_sender(from);
            if let Some(log) = self.sent_log.as_mut() {
                log.push((from, msg.recipient(), msg.marshal()));
            }
            self.queue.push_back(msg);
        }
    }

    /// Empty unless enabled with [`with_sent_log`](Self::with_sent_log).
    pub fn sent_log(&self) -> &[(NodeId, NodeId, Vec<u8>)] {
        self.sent_log.as_deref().unwrap_or_default()
    }

    pub fn node(&self, id: &NodeId) -> &G {
        match self.nodes.get(id) {
            Some(node) => node,
            None => panic!("TestContext: unknown node {id}"),
        }
    }

    pub fn node_mut(&mut self, id: &NodeId) -> &mut G {
        match self.nodes.get_mut(id) {
            Some(node) => node,
            None => panic!("TestContext: unknown node {id}"),
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &G)> {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn output(&self, id: &NodeId) -> Option<&G::Output> {
        self.node(id).output()
    }

    pub fn number_of_outputs(&self) -> usize {
        self.nodes.values().filter(|n| n.output().is_some()).count()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    pub fn status_strings(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|(id, n)| format!("{id}: {}", n.status_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::make_test_node_ids;
    use crate::gpa::testing::{PingPong, SendPing};
    use crate::gpa::OutMessages;

    fn ping_nodes(ids: &[NodeId], expect: usize) -> BTreeMap<NodeId, PingPong> {
        ids.iter().map(|id| (*id, PingPong::new(*id, expect))).collect()
    }

    #[test]
    fn test_runs_to_fixed_point() {
        let ids = make_test_node_ids(2);
        let mut tc = TestContext::new(ping_nodes(&ids, 2))
            .with_inputs([(ids[0], SendPing(ids[1], 3))]);
        tc.run_all();

        // ttl 3, 2, 1, 0 bounce back and forth.
        assert_eq!(tc.node(&ids[1]).received, vec![(ids[0], 3), (ids[0], 1)]);
        assert_eq!(tc.node(&ids[0]).received, vec![(ids[1], 2), (ids[1], 0)]);
        assert_eq!(tc.number_of_outputs(), 2);
        assert_eq!(tc.delivered_count(), 4);
        assert_eq!(tc.queued(), 0);
    }

    #[test]
    fn test_same_script_same_result() {
        let ids = make_test_node_ids(3);
        let script = || {
            vec![
                (ids[0], SendPing(ids[1], 4)),
                (ids[2], SendPing(ids[0], 2)),
                (ids[1], SendPing(ids[2], 1)),
            ]
        };
        let run = |p: f64| {
            let mut tc = TestContext::new(ping_nodes(&ids, 1))
                .with_inputs(script())
                .with_message_delivery_probability(p, 7)
                .with_wire_codec(true);
            tc.run_all();
            ids.iter()
                .map(|id| tc.node(id).received.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(1.0), run(1.0));
        assert_eq!(run(0.5), run(0.5));
    }

    #[test]
    fn test_loss_drops_messages() {
        let ids = make_test_node_ids(2);
        let mut tc = TestContext::new(ping_nodes(&ids, 1))
            .with_inputs((0..20).map(|_| (ids[0], SendPing(ids[1], 0))))
            .with_message_delivery_probability(0.5, 3);
        tc.run_all();

        assert_eq!(tc.delivered_count() + tc.dropped_count(), 20);
        assert!(tc.dropped_count() > 0);
        assert!(tc.delivered_count() > 0);
    }

    #[test]
    fn test_run_until_stops_early() {
        let ids = make_test_node_ids(2);
        let mut tc = TestContext::new(ping_nodes(&ids, 1))
            .with_inputs([(ids[0], SendPing(ids[1], 10))]);
        assert!(tc.run_until(|tc| tc.output(&ids[0]).is_some()));
        assert!(tc.queued() > 0);
        assert!(tc.output(&ids[1]).is_some());
    }

    #[test]
    fn test_enqueue_from_stamps_sender() {
        let ids = make_test_node_ids(2);
        let mut tc = TestContext::new(ping_nodes(&ids, 1));
        let out: OutMessages<_> = [crate::gpa::testing::ping(ids[1], 0)].into_iter().collect();
        tc.enqueue_from(ids[0], out);
        tc.run_all();
        assert_eq!(tc.node(&ids[1]).received, vec![(ids[0], 0)]);
        assert!(tc.sent_log().is_empty());
    }

    #[test]
    fn test_sent_log_records_wire_bytes() {
        let ids = make_test_node_ids(2);
        let mut tc = TestContext::new(ping_nodes(&ids, 1))
            .with_inputs([(ids[0], SendPing(ids[1], 1))])
            .with_sent_log();
        tc.run_all();

        let expected = vec![
            (ids[0], ids[1], crate::gpa::testing::ping(ids[1], 1).marshal()),
            (ids[1], ids[0], crate::gpa::testing::ping(ids[0], 0).marshal()),
        ];
        assert_eq!(tc.sent_log(), &expected[..]);
    }
}
