pub mod memory;
pub mod node;

pub use memory::{MemoryNetwork, MemoryNetworkConfig, MemoryTransport};
pub use node::{DriverConfig, Node, NodeHandle};

use thiserror::Error;

use crate::common::crypto::{digest, Digest, Keypair, NodeId, Signature};
use crate::common::DecodeError;

/*
    The transport is point-to-point and authenticated but unreliable: frames
    may be lost, duplicated or reordered. Every frame is signed by the
    sending node, and the receiver derives the sender's identity from the
    signing key, never from the payload. Reliability on top of this is the
    job of the ack layer, not of the transport.
*/

/// Identifies one protocol instance among those sharing a transport.
pub type ChannelId = [u8; 32];

/// Transport-level message type for automaton traffic.
pub const PEER_MSG_TYPE_GPA: u8 = 1;

/// Send-by-identity primitive provided by the peering layer.
pub trait Transport: Send + Sync {
    fn send(&self, to: NodeId, channel: ChannelId, msg_type: u8, payload: Vec<u8>);
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("frame signature does not verify")]
    BadSignature,

    #[error("frame from non-member {0}")]
    UnknownPeer(NodeId),

    #[error("node driver has stopped")]
    InboxClosed,
}

#[derive(Clone, Debug)]
pub struct Frame {
    pub channel: ChannelId,
    pub msg_type: u8,
    pub payload: Vec<u8>,
    pub sig: Signature,
}

impl Frame {
    pub fn signed(keypair: &Keypair, channel: ChannelId, msg_type: u8, payload: Vec<u8>) -> Self {
        let sig = keypair.sign(&Self::digest(&channel, msg_type, &payload));
        Frame {
            channel,
            msg_type,
            payload,
            sig,
        }
    }

    fn digest(channel: &ChannelId, msg_type: u8, payload: &[u8]) -> Digest {
        digest(&[&channel[..], &[msg_type], payload])
    }

    /// Checks the signature and returns the identity of the signer.
    pub fn verify(&self) -> Result<NodeId, DriverError> {
        if !self
            .sig
            .verify(&Self::digest(&self.channel, self.msg_type, &self.payload))
        {
            return Err(DriverError::BadSignature);
        }
        Ok(NodeId::from(&self.sig.signer))
    }
}
