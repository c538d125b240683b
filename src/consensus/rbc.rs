use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use super::peers::Peers;
use crate::common::{DecodeError, NodeId, Reader, Writer};
use crate::gpa::{Envelope, Gpa, Message, OutMessages};

/*
    Bracha's reliable broadcast. The broadcaster sends its value to everyone
    in an INITIAL message. A node echoes the first INITIAL it gets from the
    broadcaster. Once ⌈(n+f+1)/2⌉ nodes echoed the same value, or f+1 nodes
    are ready for it, a node sends READY for that value. With 2f+1 READY
    messages the value is delivered.

    If any correct node delivers, every correct node delivers the same value,
    even when the broadcaster is faulty.
*/

pub const MSG_TYPE_RBC_INITIAL: u8 = 1;
pub const MSG_TYPE_RBC_ECHO: u8 = 2;
pub const MSG_TYPE_RBC_READY: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RbcKind {
    Initial,
    Echo,
    Ready,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RbcMsg {
    pub envelope: Envelope,
    pub kind: RbcKind,
    pub value: Vec<u8>,
}

impl RbcKind {
    fn tag(self) -> u8 {
        match self {
            RbcKind::Initial => MSG_TYPE_RBC_INITIAL,
            RbcKind::Echo => MSG_TYPE_RBC_ECHO,
            RbcKind::Ready => MSG_TYPE_RBC_READY,
        }
    }
}

impl Message for RbcMsg {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn encode(&self, w: &mut Writer) {
        w.u8(self.kind.tag()).bytes(&self.value);
    }
}

pub struct Rbc {
    me: NodeId,
    peers: Peers,
    broadcaster: NodeId,
    input_given: bool,
    echo_sent: bool,
    ready_sent: bool,
    echoes: BTreeMap<Vec<u8>, BTreeSet<NodeId>>,
    readies: BTreeMap<Vec<u8>, BTreeSet<NodeId>>,
    output: Option<Vec<u8>>,
}

impl Rbc {
    pub fn new(me: NodeId, peers: Peers, broadcaster: NodeId) -> Self {
        Rbc {
            me,
            peers,
            broadcaster,
            input_given: false,
            echo_sent: false,
            ready_sent: false,
            echoes: BTreeMap::new(),
            readies: BTreeMap::new(),
            output: None,
        }
    }

    pub fn broadcaster(&self) -> NodeId {
        self.broadcaster
    }

    fn echo_threshold(&self) -> usize {
        (self.peers.n() + self.peers.f() + 2) / 2
    }

    fn send_all(&self, kind: RbcKind, value: &[u8]) -> OutMessages<RbcMsg> {
        self.peers
            .members
            .iter()
            .map(|to| RbcMsg {
                envelope: Envelope::to(*to),
                kind,
                value: value.to_vec(),
            })
            .collect()
    }

    fn handle_initial(&mut self, from: NodeId, value: Vec<u8>) -> OutMessages<RbcMsg> {
        if from != self.broadcaster {
            debug!(node = %self.me, from = %from, "initial from non-broadcaster ignored");
            return OutMessages::new();
        }
        if self.echo_sent {
            return OutMessages::new();
        }
        self.echo_sent = true;
        self.send_all(RbcKind::Echo, &value)
    }

    fn handle_echo(&mut self, from: NodeId, value: Vec<u8>) -> OutMessages<RbcMsg> {
        let echoed = self.echoes.entry(value.clone()).or_default();
        echoed.insert(from);
        if echoed.len() >= self.echo_threshold() {
            return self.send_ready(&value);
        }
        OutMessages::new()
    }

    fn handle_ready(&mut self, from: NodeId, value: Vec<u8>) -> OutMessages<RbcMsg> {
        let ready = self.readies.entry(value.clone()).or_default();
        ready.insert(from);
        let count = ready.len();

        let mut out = OutMessages::new();
        if count > self.peers.f() {
            out.add_all(self.send_ready(&value));
        }
        if count > 2 * self.peers.f() && self.output.is_none() {
            debug!(node = %self.me, broadcaster = %self.broadcaster, "value delivered");
            self.output = Some(value);
        }
        out
    }

    fn send_ready(&mut self, value: &[u8]) -> OutMessages<RbcMsg> {
        if self.ready_sent {
            return OutMessages::new();
        }
        self.ready_sent = true;
        self.send_all(RbcKind::Ready, value)
    }
}

impl Gpa for Rbc {
    type Input = Vec<u8>;
    type Output = Vec<u8>;
    type Msg = RbcMsg;

    fn input(&mut self, value: Vec<u8>) -> OutMessages<RbcMsg> {
        if self.me != self.broadcaster {
            panic!("RBC: input given to {} which is not the broadcaster", self.me);
        }
        if self.input_given {
            panic!("RBC: input given twice");
        }
        self.input_given = true;
        self.send_all(RbcKind::Initial, &value)
    }

    fn message(&mut self, msg: RbcMsg) -> OutMessages<RbcMsg> {
        let from = msg.sender();
        if !self.peers.is_member(&from) {
            debug!(node = %self.me, from = %from, "message from non-member ignored");
            return OutMessages::new();
        }
        trace!(node = %self.me, from = %from, kind = ?msg.kind, "rbc message");
        match msg.kind {
            RbcKind::Initial => self.handle_initial(from, msg.value),
            RbcKind::Echo => self.handle_echo(from, msg.value),
            RbcKind::Ready => self.handle_ready(from, msg.value),
        }
    }

    fn output(&self) -> Option<&Vec<u8>> {
        self.output.as_ref()
    }

    fn unmarshal_message(&self, data: &[u8]) -> Result<RbcMsg, DecodeError> {
        let mut r = Reader::new(data);
        let kind = match r.u8()? {
            MSG_TYPE_RBC_INITIAL => RbcKind::Initial,
            MSG_TYPE_RBC_ECHO => RbcKind::Echo,
            MSG_TYPE_RBC_READY => RbcKind::Ready,
            tag => return Err(DecodeError::UnknownTag { tag, context: "RBC" }),
        };
        let value = r.bytes()?.to_vec();
        r.finish()?;
        Ok(RbcMsg {
            envelope: Envelope::default(),
            kind,
            value,
        })
    }

    fn status_string(&self) -> String {
        let max = |votes: &BTreeMap<Vec<u8>, BTreeSet<NodeId>>| {
            votes.values().map(BTreeSet::len).max().unwrap_or(0)
        };
        format!(
            "{{RBC: broadcaster={}, echoes={}, readies={}, done={}}}",
            self.broadcaster,
            max(&self.echoes),
            max(&self.readies),
            self.output.is_some(),
        )
    }
}
