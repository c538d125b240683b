use std::collections::VecDeque;

use tracing::trace;

use super::{Gpa, Message, OutMessages};
use crate::common::{DecodeError, NodeId};

/// Delivers messages a node addresses to itself without leaving the process.
///
/// Everything the nested automaton emits towards `me` is fed straight back
/// into it, in emission order, until only messages for other nodes remain.
pub struct OwnHandler<G: Gpa> {
    me: NodeId,
    nested: G,
}

impl<G: Gpa> OwnHandler<G> {
    pub fn new(me: NodeId, nested: G) -> Self {
        OwnHandler { me, nested }
    }

    pub fn nested(&self) -> &G {
        &self.nested
    }

    fn handle_own(&mut self, mut out: OutMessages<G::Msg>) -> OutMessages<G::Msg> {
        let mut remote = OutMessages::new();
        let mut local: VecDeque<G::Msg> = VecDeque::new();
        loop {
            let own = out.take_where(|m| m.recipient() == self.me);
            remote.add_all(out);
            local.extend(own);

            let Some(mut msg) = local.pop_front() else {
                return remote;
            };
            trace!(node = %self.me, "delivering own message");
            msg.set_sender(self.me);
            out = self.nested.message(msg);
        }
    }
}

impl<G: Gpa> Gpa for OwnHandler<G> {
    type Input = G::Input;
    type Output = G::Output;
    type Msg = G::Msg;

    fn input(&mut self, input: Self::Input) -> OutMessages<Self::Msg> {
        let out = self.nested.input(input);
        self.handle_own(out)
    }

    fn message(&mut self, msg: Self::Msg) -> OutMessages<Self::Msg> {
        let out = self.nested.message(msg);
        self.handle_own(out)
    }

    fn output(&self) -> Option<&Self::Output> {
        self.nested.output()
    }

    fn unmarshal_message(&self, data: &[u8]) -> Result<Self::Msg, DecodeError> {
        self.nested.unmarshal_message(data)
    }

    fn status_string(&self) -> String {
        self.nested.status_string()
    }
}
