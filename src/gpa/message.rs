use std::fmt::Debug;

use crate::common::{NodeId, Writer};

/// Addressing shared by every message. Neither field is part of the wire
/// encoding: the recipient is the transport destination and the sender is
/// filled in by the receiving side from the authenticated channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    pub sender: NodeId,
    pub recipient: NodeId,
}

impl Envelope {
    pub fn to(recipient: NodeId) -> Self {
        Envelope {
            sender: NodeId::default(),
            recipient,
        }
    }
}

/// A protocol message. Each automaton defines a closed set of these (usually
/// an enum) with a static tag per variant.
pub trait Message: Clone + Debug {
    fn envelope(&self) -> &Envelope;

    fn envelope_mut(&mut self) -> &mut Envelope;

    /// Writes the type tag followed by the payload.
    fn encode(&self, w: &mut Writer);

    fn sender(&self) -> NodeId {
        self.envelope().sender
    }

    fn recipient(&self) -> NodeId {
        self.envelope().recipient
    }

    fn set_sender(&mut self, sender: NodeId) {
        self.envelope_mut().sender = sender;
    }

    fn set_recipient(&mut self, recipient: NodeId) {
        self.envelope_mut().recipient = recipient;
    }

    fn marshal(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_bytes()
    }
}
