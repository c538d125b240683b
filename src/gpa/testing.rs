//! A tiny automaton for exercising the wrappers and the harness.

use crate::common::{DecodeError, NodeId, Reader, Writer};
use crate::gpa::{Envelope, Gpa, Message, OutMessages};

const MSG_TYPE_PING: u8 = 1;

#[derive(Clone, Debug, PartialEq)]
pub struct Ping {
    pub envelope: Envelope,
    pub ttl: u8,
}

impl Message for Ping {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn encode(&self, w: &mut Writer) {
        w.u8(MSG_TYPE_PING).u8(self.ttl);
    }
}

/// Sends a ping with the given ttl to the given node.
pub struct SendPing(pub NodeId, pub u8);

/// Records every ping it receives and answers the sender while ttl lasts.
/// Outputs the first `expect` pings once they have arrived.
pub struct PingPong {
    pub me: NodeId,
    pub expect: usize,
    pub received: Vec<(NodeId, u8)>,
    output: Option<Vec<(NodeId, u8)>>,
}

impl PingPong {
    pub fn new(me: NodeId, expect: usize) -> Self {
        PingPong {
            me,
            expect,
            received: Vec::new(),
            output: (expect == 0).then(Vec::new),
        }
    }
}

pub fn ping(to: NodeId, ttl: u8) -> Ping {
    Ping {
        envelope: Envelope::to(to),
        ttl,
    }
}

impl Gpa for PingPong {
    type Input = SendPing;
    type Output = Vec<(NodeId, u8)>;
    type Msg = Ping;

    fn input(&mut self, input: SendPing) -> OutMessages<Ping> {
        let mut out = OutMessages::new();
        out.add(ping(input.0, input.1));
        out
    }

    fn message(&mut self, msg: Ping) -> OutMessages<Ping> {
        self.received.push((msg.sender(), msg.ttl));
        if self.output.is_none() && self.received.len() >= self.expect {
            self.output = Some(self.received.clone());
        }
        let mut out = OutMessages::new();
        if msg.ttl > 0 {
            out.add(ping(msg.sender(), msg.ttl - 1));
        }
        out
    }

    fn output(&self) -> Option<&Self::Output> {
        self.output.as_ref()
    }

    fn unmarshal_message(&self, data: &[u8]) -> Result<Ping, DecodeError> {
        let mut r = Reader::new(data);
        match r.u8()? {
            MSG_TYPE_PING => {
                let ttl = r.u8()?;
                r.finish()?;
                Ok(Ping {
                    envelope: Envelope::default(),
                    ttl,
                })
            }
            tag => Err(DecodeError::UnknownTag {
                tag,
                context: "PingPong",
            }),
        }
    }

    fn status_string(&self) -> String {
        format!(
            "{{PingPong@{}: received={}/{}}}",
            self.me,
            self.received.len(),
            self.expect
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::make_test_node_ids;

    #[test]
    fn test_output_is_frozen_once_set() {
        let ids = make_test_node_ids(2);
        let mut node = PingPong::new(ids[0], 1);
        assert!(node.output().is_none());

        let mut first = ping(ids[0], 0);
        first.set_sender(ids[1]);
        let _ = node.message(first.clone());
        assert_eq!(node.output(), Some(&vec![(ids[1], 0)]));

        let _ = node.message(first);
        assert_eq!(node.received.len(), 2);
        assert_eq!(node.output(), Some(&vec![(ids[1], 0)]));
    }
}
