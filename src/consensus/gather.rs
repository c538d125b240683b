//! Every committee member reliably broadcasts one value; the output is the
//! set of values from the first quorum of broadcasts that completed.
//!
//! One [`Rbc`] instance runs per member. Their messages travel inside
//! [`Wrapped`] envelopes, routed by subsystem and member index.

use std::collections::BTreeMap;

use tracing::debug;

use super::peers::Peers;
use super::rbc::{Rbc, RbcMsg};
use crate::common::{DecodeError, NodeId, Reader, Writer};
use crate::gpa::wrapper::wrap_all;
use crate::gpa::{Envelope, Gpa, Message, OutMessages, Wrapped};

pub const MSG_TYPE_GATHER_WRAPPED: u8 = 1;

const SUBSYSTEM_RBC: u8 = 0;

#[derive(Clone, Debug, PartialEq)]
pub enum GatherMsg {
    Wrapped(Wrapped<RbcMsg>),
}

impl Message for GatherMsg {
    fn envelope(&self) -> &Envelope {
        match self {
            GatherMsg::Wrapped(w) => &w.envelope,
        }
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        match self {
            GatherMsg::Wrapped(w) => &mut w.envelope,
        }
    }

    fn encode(&self, w: &mut Writer) {
        match self {
            GatherMsg::Wrapped(wrapped) => {
                w.u8(MSG_TYPE_GATHER_WRAPPED);
                wrapped.encode_body(w);
            }
        }
    }
}

pub struct Gather {
    me: NodeId,
    peers: Peers,
    rbcs: Vec<Rbc>,
    input_given: bool,
    output: Option<BTreeMap<NodeId, Vec<u8>>>,
}

impl Gather {
    pub fn new(me: NodeId, peers: Peers) -> Self {
        if !peers.is_member(&me) {
            panic!("Gather: {me} is not a committee member");
        }
        let rbcs = peers
            .members
            .iter()
            .map(|broadcaster| Rbc::new(me, peers.clone(), *broadcaster))
            .collect();
        Gather {
            me,
            peers,
            rbcs,
            input_given: false,
            output: None,
        }
    }

    fn wrap(index: u16, out: OutMessages<RbcMsg>) -> OutMessages<GatherMsg> {
        wrap_all(SUBSYSTEM_RBC, index, out, GatherMsg::Wrapped)
    }

    fn try_output(&mut self) {
        if self.output.is_some() {
            return;
        }
        let delivered: BTreeMap<NodeId, Vec<u8>> = self
            .rbcs
            .iter()
            .filter_map(|rbc| rbc.output().map(|v| (rbc.broadcaster(), v.clone())))
            .collect();
        if delivered.len() >= self.peers.quorum() {
            debug!(node = %self.me, values = delivered.len(), "gather complete");
            self.output = Some(delivered);
        }
    }
}

impl Gpa for Gather {
    type Input = Vec<u8>;
    type Output = BTreeMap<NodeId, Vec<u8>>;
    type Msg = GatherMsg;

    fn input(&mut self, value: Vec<u8>) -> OutMessages<GatherMsg> {
        if self.input_given {
            panic!("Gather: input given twice");
        }
        self.input_given = true;
        let Some(index) = self.peers.index_of(&self.me) else {
            panic!("Gather: {} is not a committee member", self.me);
        };
        let out = self.rbcs[index as usize].input(value);
        self.try_output();
        Self::wrap(index, out)
    }

    fn message(&mut self, msg: GatherMsg) -> OutMessages<GatherMsg> {
        let GatherMsg::Wrapped(wrapped) = msg;
        let (subsystem, index) = (wrapped.subsystem, wrapped.index);
        if subsystem != SUBSYSTEM_RBC || index as usize >= self.rbcs.len() {
            panic!("Gather: no nested instance for subsystem {subsystem} index {index}");
        }
        let out = self.rbcs[index as usize].message(wrapped.into_inner());
        self.try_output();
        Self::wrap(index, out)
    }

    fn output(&self) -> Option<&Self::Output> {
        self.output.as_ref()
    }

    fn unmarshal_message(&self, data: &[u8]) -> Result<GatherMsg, DecodeError> {
        let mut r = Reader::new(data);
        match r.u8()? {
            MSG_TYPE_GATHER_WRAPPED => {
                let wrapped = Wrapped::decode_body(&mut r, |subsystem, index, inner| {
                    match (subsystem, self.rbcs.get(index as usize)) {
                        (SUBSYSTEM_RBC, Some(rbc)) => rbc.unmarshal_message(inner),
                        _ => Err(DecodeError::Invalid(format!(
                            "Gather: no nested instance for subsystem {subsystem} index {index}"
                        ))),
                    }
                })?;
                r.finish()?;
                Ok(GatherMsg::Wrapped(wrapped))
            }
            tag => Err(DecodeError::UnknownTag {
                tag,
                context: "Gather",
            }),
        }
    }

    fn status_string(&self) -> String {
        let delivered = self.rbcs.iter().filter(|r| r.output().is_some()).count();
        format!(
            "{{Gather: delivered={}/{}, quorum={}, done={}}}",
            delivered,
            self.peers.n(),
            self.peers.quorum(),
            self.output.is_some(),
        )
    }
}
