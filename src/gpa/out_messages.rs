use std::collections::BTreeMap;

use super::message::Message;
use crate::common::NodeId;

/// Messages produced by a single call into an automaton, in emission order.
#[derive(Clone, Debug)]
pub struct OutMessages<M> {
    msgs: Vec<M>,
}

impl<M> Default for OutMessages<M> {
    fn default() -> Self {
        OutMessages { msgs: Vec::new() }
    }
}

impl<M> OutMessages<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, msg: M) -> &mut Self {
        self.msgs.push(msg);
        self
    }

    /// Appends everything from `other` after the messages already held.
    pub fn add_all(&mut self, other: OutMessages<M>) -> &mut Self {
        self.msgs.extend(other.msgs);
        self
    }

    pub fn count(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, M> {
        self.msgs.iter()
    }

    /// Rewraps every message, e.g. into an outer automaton's message type.
    pub fn map<N>(self, f: impl FnMut(M) -> N) -> OutMessages<N> {
        OutMessages {
            msgs: self.msgs.into_iter().map(f).collect(),
        }
    }
}

impl<M: Message> OutMessages<M> {
    /// Splits off the messages matching `pred`, keeping the rest in place.
    pub fn take_where(&mut self, mut pred: impl FnMut(&M) -> bool) -> OutMessages<M> {
        let (taken, kept) = std::mem::take(&mut self.msgs)
            .into_iter()
            .partition(|m| pred(m));
        self.msgs = kept;
        OutMessages { msgs: taken }
    }

    /// Groups messages by recipient, preserving relative order per recipient.
    pub fn by_recipient(self) -> BTreeMap<NodeId, Vec<M>> {
        let mut grouped: BTreeMap<NodeId, Vec<M>> = BTreeMap::new();
        for msg in self.msgs {
            grouped.entry(msg.recipient()).or_default().push(msg);
        }
        grouped
    }
}

impl<M> Extend<M> for OutMessages<M> {
    fn extend<T: IntoIterator<Item = M>>(&mut self, iter: T) {
        self.msgs.extend(iter);
    }
}

impl<M> FromIterator<M> for OutMessages<M> {
    fn from_iter<T: IntoIterator<Item = M>>(iter: T) -> Self {
        OutMessages {
            msgs: iter.into_iter().collect(),
        }
    }
}

impl<M> IntoIterator for OutMessages<M> {
    type Item = M;
    type IntoIter = std::vec::IntoIter<M>;

    fn into_iter(self) -> Self::IntoIter {
        self.msgs.into_iter()
    }
}
