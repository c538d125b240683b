use std::time::Duration;

use crate::common::{DecodeError, NodeId, Reader, Writer};
use crate::gpa::{Envelope, Message};

pub const MSG_TYPE_ACK_BATCH: u8 = 1;
pub const MSG_TYPE_ACK_RESET: u8 = 2;

/// Most nested messages one batch can carry.
pub const MAX_BATCH_MSGS: usize = u16::MAX as usize;

/// Messages exchanged by [`AckHandler`](super::AckHandler) instances.
#[derive(Clone, Debug, PartialEq)]
pub enum AckMsg<M> {
    Batch(Batch<M>),
    Reset(Reset),
}

/// Nested messages for one recipient plus the acks owed to it.
///
/// Without an `id` the batch carries acks only and is never retransmitted.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch<M> {
    pub envelope: Envelope,
    pub id: Option<u32>,
    pub msgs: Vec<M>,
    pub acks: Vec<u32>,
    /// When this batch was last put on the wire. Local bookkeeping only.
    pub sent_at: Option<Duration>,
}

/// Handshake establishing the batch numbering towards a peer.
#[derive(Clone, Debug, PartialEq)]
pub struct Reset {
    pub envelope: Envelope,
    pub is_response: bool,
    /// Highest batch id the responder has received from the requester,
    /// 0 if none. Meaningless in requests.
    pub latest_id: u32,
}

impl<M> Batch<M> {
    pub fn ack_only(to: NodeId, acks: Vec<u32>) -> Self {
        Batch {
            envelope: Envelope::to(to),
            id: None,
            msgs: Vec::new(),
            acks,
            sent_at: None,
        }
    }
}

impl Reset {
    pub fn request(to: NodeId) -> Self {
        Reset {
            envelope: Envelope::to(to),
            is_response: false,
            latest_id: 0,
        }
    }

    pub fn response(to: NodeId, latest_id: u32) -> Self {
        Reset {
            envelope: Envelope::to(to),
            is_response: true,
            latest_id,
        }
    }
}

impl<M: Message> Message for AckMsg<M> {
    fn envelope(&self) -> &Envelope {
        match self {
            AckMsg::Batch(b) => &b.envelope,
            AckMsg::Reset(r) => &r.envelope,
        }
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        match self {
            AckMsg::Batch(b) => &mut b.envelope,
            AckMsg::Reset(r) => &mut r.envelope,
        }
    }

    fn encode(&self, w: &mut Writer) {
        match self {
            AckMsg::Batch(b) => {
                w.u8(MSG_TYPE_ACK_BATCH).bool(b.id.is_some());
                if let Some(id) = b.id {
                    w.u32(id);
                }
                w.count(b.msgs.len());
                for m in &b.msgs {
                    w.bytes(&m.marshal());
                }
                w.count(b.acks.len());
                for ack in &b.acks {
                    w.u32(*ack);
                }
            }
            AckMsg::Reset(r) => {
                w.u8(MSG_TYPE_ACK_RESET).bool(r.is_response).u32(r.latest_id);
            }
        }
    }
}

/// Decodes an ack-layer message, handing each nested payload to `decode_inner`.
pub fn decode<M>(
    data: &[u8],
    decode_inner: impl Fn(&[u8]) -> Result<M, DecodeError>,
) -> Result<AckMsg<M>, DecodeError> {
    let mut r = Reader::new(data);
    let msg = match r.u8()? {
        MSG_TYPE_ACK_BATCH => {
            let id = if r.bool()? { Some(r.u32()?) } else { None };
            let msg_count = r.u16()?;
            let mut msgs = Vec::with_capacity(msg_count as usize);
            for _ in 0..msg_count {
                msgs.push(decode_inner(r.bytes()?)?);
            }
            let ack_count = r.u16()?;
            let mut acks = Vec::with_capacity(ack_count as usize);
            for _ in 0..ack_count {
                acks.push(r.u32()?);
            }
            AckMsg::Batch(Batch {
                envelope: Envelope::default(),
                id,
                msgs,
                acks,
                sent_at: None,
            })
        }
        MSG_TYPE_ACK_RESET => AckMsg::Reset(Reset {
            envelope: Envelope::default(),
            is_response: r.bool()?,
            latest_id: r.u32()?,
        }),
        tag => {
            return Err(DecodeError::UnknownTag {
                tag,
                context: "AckHandler",
            })
        }
    };
    r.finish()?;
    Ok(msg)
}
