//! Generic protocol automata.
//!
//! Every protocol in the node is a deterministic state machine that consumes
//! local inputs and received messages and produces outgoing messages. The
//! automaton never performs I/O, never blocks and never reads a clock: time
//! arrives as an input like anything else. Reliability, self-delivery and
//! nesting are added by wrapping one automaton in another.

pub mod ack;
pub mod harness;
pub mod message;
pub mod out_messages;
pub mod own_handler;
#[cfg(test)]
pub(crate) mod testing;
pub mod wrapper;

pub use ack::{AckHandler, AckHandlerConfig, AckInput, AckMsg};
pub use harness::TestContext;
pub use message::{Envelope, Message};
pub use out_messages::OutMessages;
pub use own_handler::OwnHandler;
pub use wrapper::Wrapped;

use crate::common::DecodeError;

/// The automaton contract.
///
/// # Guarantees
///
/// - **Synchronous**: no method blocks or awaits
/// - **Deterministic**: the same state fed the same input or message yields
///   the same outgoing messages and the same output
/// - **No I/O**: the owning driver sends whatever the collector holds
///
/// Stale, duplicate and out-of-order messages are ordinary traffic and must
/// be tolerated. A message variant the instance can never legitimately
/// receive is a wiring bug and panics.
pub trait Gpa {
    /// Local event, never serialized.
    type Input;

    /// Result, stable once set.
    type Output;

    type Msg: Message;

    fn input(&mut self, input: Self::Input) -> OutMessages<Self::Msg>;

    /// `msg.sender()` has already been set from the authenticated channel.
    fn message(&mut self, msg: Self::Msg) -> OutMessages<Self::Msg>;

    fn output(&self) -> Option<&Self::Output>;

    fn unmarshal_message(&self, data: &[u8]) -> Result<Self::Msg, DecodeError>;

    /// Progress snapshot for logs. Never used for decisions.
    fn status_string(&self) -> String;
}
