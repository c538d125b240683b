use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::{ChannelId, DriverError, Frame, Transport, PEER_MSG_TYPE_GPA};
use crate::common::NodeId;
use crate::consensus::peers::Peers;
use crate::gpa::{AckHandler, AckHandlerConfig, AckInput, Gpa, Message, OutMessages};

/// Settings for one driven protocol instance.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Interval between timer ticks fed to the ack layer.
    pub tick_interval: Duration,
    /// Capacity of the input and frame queues.
    pub inbox_capacity: usize,
    /// Channel this instance listens on.
    pub channel: ChannelId,
    pub ack: AckHandlerConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            tick_interval: Duration::from_millis(500),
            inbox_capacity: 1024,
            channel: [0u8; 32],
            ack: AckHandlerConfig::default(),
        }
    }
}

enum Command<I> {
    Input(I),
    Dismiss(NodeId),
    Shutdown,
}

/// Owns one protocol instance, wrapped for reliable delivery, and is the
/// only place that touches it. Inputs, frames and ticks are applied one at
/// a time; whatever the automaton emits is handed to the transport before
/// the next event is taken.
pub struct Node<G: Gpa> {
    me: NodeId,
    peers: Peers,
    config: DriverConfig,
    gpa: AckHandler<G>,
    transport: Arc<dyn Transport>,
    commands: mpsc::Receiver<Command<G::Input>>,
    frames: mpsc::Receiver<Frame>,
    output: watch::Sender<Option<G::Output>>,
}

/// Client side of a running [`Node`].
pub struct NodeHandle<I, O> {
    commands: mpsc::Sender<Command<I>>,
    frames: mpsc::Sender<Frame>,
    output: watch::Receiver<Option<O>>,
}

impl<I, O> Clone for NodeHandle<I, O> {
    fn clone(&self) -> Self {
        NodeHandle {
            commands: self.commands.clone(),
            frames: self.frames.clone(),
            output: self.output.clone(),
        }
    }
}

impl<G> Node<G>
where
    G: Gpa,
    G::Output: Clone,
{
    pub fn new(
        me: NodeId,
        peers: Peers,
        nested: G,
        transport: Arc<dyn Transport>,
        config: DriverConfig,
    ) -> (Self, NodeHandle<G::Input, G::Output>) {
        let (commands_tx, commands) = mpsc::channel(config.inbox_capacity);
        let (frames_tx, frames) = mpsc::channel(config.inbox_capacity);
        let (output_tx, output_rx) = watch::channel(None);

        let node = Node {
            me,
            peers,
            gpa: AckHandler::new(me, nested, config.ack.clone()),
            config,
            transport,
            commands,
            frames,
            output: output_tx,
        };
        let handle = NodeHandle {
            commands: commands_tx,
            frames: frames_tx,
            output: output_rx,
        };
        (node, handle)
    }

    pub async fn run(mut self) {
        info!(node = %self.me, "running node driver");
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Input(input)) => {
                        let out = self.gpa.input(AckInput::Nested(input));
                        self.send(out);
                    }
                    Some(Command::Dismiss(peer)) => self.gpa.dismiss_peer(peer),
                    Some(Command::Shutdown) | None => break,
                },
                Some(frame) = self.frames.recv() => {
                    if let Err(e) = self.handle_frame(frame) {
                        warn!(node = %self.me, error = %e, "dropping frame");
                    }
                }
                _ = ticker.tick() => {
                    let tick = AckHandler::<G>::make_tick_input(started.elapsed());
                    let out = self.gpa.input(tick);
                    self.send(out);
                }
            }
            self.publish_output();
        }
        debug!(node = %self.me, status = %self.gpa.status_string(), "node driver stopped");
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<(), DriverError> {
        let from = frame.verify()?;
        if !self.peers.is_member(&from) {
            return Err(DriverError::UnknownPeer(from));
        }
        if frame.channel != self.config.channel || frame.msg_type != PEER_MSG_TYPE_GPA {
            trace!(node = %self.me, from = %from, "frame for another channel ignored");
            return Ok(());
        }

        let mut msg = self.gpa.unmarshal_message(&frame.payload)?;
        msg.set_sender(from);
        msg.set_recipient(self.me);
        let out = self.gpa.message(msg);
        self.send(out);
        Ok(())
    }

    fn send(&self, out: OutMessages<<AckHandler<G> as Gpa>::Msg>) {
        for msg in out {
            self.transport.send(
                msg.recipient(),
                self.config.channel,
                PEER_MSG_TYPE_GPA,
                msg.marshal(),
            );
        }
    }

    fn publish_output(&self) {
        if self.output.borrow().is_some() {
            return;
        }
        if let Some(output) = self.gpa.output() {
            info!(node = %self.me, "output available");
            self.output.send_replace(Some(output.clone()));
        }
    }
}

impl<I, O: Clone> NodeHandle<I, O> {
    pub async fn input(&self, input: I) -> Result<(), DriverError> {
        self.command(Command::Input(input)).await
    }

    pub async fn dismiss_peer(&self, peer: NodeId) -> Result<(), DriverError> {
        self.command(Command::Dismiss(peer)).await
    }

    pub async fn shutdown(&self) -> Result<(), DriverError> {
        self.command(Command::Shutdown).await
    }

    async fn command(&self, command: Command<I>) -> Result<(), DriverError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DriverError::InboxClosed)
    }

    /// Where the transport delivers frames for this node.
    pub fn frames(&self) -> mpsc::Sender<Frame> {
        self.frames.clone()
    }

    pub fn output(&self) -> Option<O> {
        self.output.borrow().clone()
    }

    /// Resolves once the protocol has an output, or with `None` if the
    /// driver stops first. Dropping the future abandons the wait; the
    /// protocol keeps running.
    pub async fn wait_output(&mut self) -> Option<O> {
        loop {
            if let Some(output) = self.output.borrow_and_update().clone() {
                return Some(output);
            }
            if self.output.changed().await.is_err() {
                return self.output.borrow().clone();
            }
        }
    }
}
