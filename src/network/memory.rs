//! In-process transport with seeded random loss, for tests and the demo.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tracing::trace;

use super::{ChannelId, Frame, Transport};
use crate::common::{Keypair, NodeId};

#[derive(Debug, Clone)]
pub struct MemoryNetworkConfig {
    /// Probability that a frame reaches its destination.
    pub delivery_probability: f64,
    pub seed: u64,
}

impl Default for MemoryNetworkConfig {
    fn default() -> Self {
        MemoryNetworkConfig {
            delivery_probability: 1.0,
            seed: 0,
        }
    }
}

pub struct MemoryNetwork {
    config: MemoryNetworkConfig,
    routes: Mutex<HashMap<NodeId, mpsc::Sender<Frame>>>,
    rng: Mutex<ChaCha8Rng>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl MemoryNetwork {
    pub fn new(config: MemoryNetworkConfig) -> Arc<Self> {
        Arc::new(MemoryNetwork {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(config.seed)),
            config,
            routes: Mutex::new(HashMap::new()),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Frames addressed to `id` are pushed into `inbox` from now on.
    pub fn register(&self, id: NodeId, inbox: mpsc::Sender<Frame>) {
        lock(&self.routes).insert(id, inbox);
    }

    pub fn unregister(&self, id: &NodeId) {
        lock(&self.routes).remove(id);
    }

    /// A transport that signs with `keypair` and sends through this network.
    pub fn transport(self: &Arc<Self>, keypair: Keypair) -> MemoryTransport {
        MemoryTransport {
            network: Arc::clone(self),
            keypair,
        }
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn route(&self, to: NodeId, frame: Frame) {
        let p = self.config.delivery_probability;
        if p < 1.0 && !lock(&self.rng).gen_bool(p) {
            trace!(to = %to, "frame lost");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let inbox = lock(&self.routes).get(&to).cloned();
        // A full or closed inbox loses the frame like the wire would.
        match inbox.map(|inbox| inbox.try_send(frame)) {
            Some(Ok(())) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                trace!(to = %to, "frame undeliverable");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// A poisoned lock only means another sender panicked mid-send; the maps
/// stay usable.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    keypair: Keypair,
}

impl Transport for MemoryTransport {
    fn send(&self, to: NodeId, channel: ChannelId, msg_type: u8, payload: Vec<u8>) {
        let frame = Frame::signed(&self.keypair, channel, msg_type, payload);
        self.network.route(to, frame);
    }
}
