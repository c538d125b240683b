//! Carrying nested automata messages inside an outer automaton's message.
//!
//! The outer automaton owns one tag for wrapped traffic. After it comes the
//! subsystem byte (which nested decoder applies) and the instance index
//! (which nested instance the message belongs to), then the nested message
//! with its own tag. Nested tag spaces therefore never collide with the outer
//! one: the outer decoder switches on its own tags only.

use super::{Envelope, Message, OutMessages};
use crate::common::{DecodeError, Reader, Writer};

#[derive(Clone, Debug, PartialEq)]
pub struct Wrapped<M> {
    pub envelope: Envelope,
    pub subsystem: u8,
    pub index: u16,
    pub inner: M,
}

impl<M: Message> Wrapped<M> {
    pub fn new(subsystem: u8, index: u16, inner: M) -> Self {
        Wrapped {
            envelope: *inner.envelope(),
            subsystem,
            index,
            inner,
        }
    }

    /// Unwraps for delivery, carrying the authenticated sender inwards.
    pub fn into_inner(self) -> M {
        let mut inner = self.inner;
        *inner.envelope_mut() = self.envelope;
        inner
    }

    /// Payload after the outer tag.
    pub fn encode_body(&self, w: &mut Writer) {
        w.u8(self.subsystem).u16(self.index).raw(&self.inner.marshal());
    }

    /// `decode_inner` receives the subsystem, the index and the nested bytes
    /// and rejects combinations the receiver does not own.
    pub fn decode_body(
        r: &mut Reader<'_>,
        decode_inner: impl FnOnce(u8, u16, &[u8]) -> Result<M, DecodeError>,
    ) -> Result<Self, DecodeError> {
        let subsystem = r.u8()?;
        let index = r.u16()?;
        let inner = decode_inner(subsystem, index, r.rest())?;
        Ok(Wrapped {
            envelope: *inner.envelope(),
            subsystem,
            index,
            inner,
        })
    }
}

/// Wraps everything a nested instance emitted.
pub fn wrap_all<M: Message, N>(
    subsystem: u8,
    index: u16,
    out: OutMessages<M>,
    mut into_outer: impl FnMut(Wrapped<M>) -> N,
) -> OutMessages<N> {
    out.map(|m| into_outer(Wrapped::new(subsystem, index, m)))
}
