pub mod codec;
pub mod crypto;

pub use codec::{DecodeError, Reader, Writer};
pub use crypto::{Keypair, NodeId, Pubkey, Signature};
