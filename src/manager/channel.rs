//! Manager control-channel ownership.
//!
//! # Responsibilities
//! - Hold the single authenticated channel (at most one `connected` at a time)
//! - Serialize outbound frames through one writer task
//! - Dispatch inbound frames to the pending table and connection registry
//! - Run the keepalive probe and declare the channel dead on a missed ack
//! - On loss, fail all waiters and close dependent tunnels before anything
//!   else can observe the slot as empty
//!
//! A generation counter makes teardown idempotent: the reader task of a
//! superseded channel finds the slot already advanced and does nothing, so a
//! fresh request can never be matched against a stale waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::manager::frames::{self, ControlFrame};
use crate::manager::pending::PendingDecisions;
use crate::manager::registry::{ConnectionRegistry, TunnelCommand};
use crate::observability::metrics;
use crate::relay::Relay;

/// Outbound frames queued between handler tasks and the writer task. Senders
/// block when the manager transport is slow, which is the backpressure the
/// wire contract requires.
const OUTBOUND_QUEUE: usize = 64;

/// Handle to the live channel: the generation it was installed under and the
/// queue drained by its writer task.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    pub generation: u64,
    outbound: mpsc::Sender<Message>,
}

impl ChannelHandle {
    /// Queue a frame for the writer task. Fails when the channel is closing.
    pub async fn send_frame(&self, frame: &ControlFrame) -> Result<(), RelayError> {
        let encoded = frames::encode(frame)
            .map_err(|err| RelayError::Internal(format!("frame encoding failed: {err}")))?;
        self.outbound
            .send(Message::Text(encoded.into()))
            .await
            .map_err(|_| RelayError::ManagerNotConnected)
    }

    async fn send_raw(&self, message: Message) -> Result<(), RelayError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| RelayError::ManagerNotConnected)
    }
}

/// The process-wide "single manager" slot, a field of [`Relay`].
#[derive(Debug, Default)]
pub struct ManagerSlot {
    current: Mutex<Option<ChannelHandle>>,
    generation: AtomicU64,
}

impl ManagerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live channel handle, if any.
    pub fn current(&self) -> Option<ChannelHandle> {
        self.current.lock().expect("manager slot poisoned").clone()
    }

    pub fn is_connected(&self) -> bool {
        self.current.lock().expect("manager slot poisoned").is_some()
    }

    /// Install a freshly authenticated channel, superseding any existing one.
    ///
    /// The old channel's teardown (fail every waiter, close every tunnel)
    /// completes before the new handle becomes visible, so no RPC sent on the
    /// new channel can resolve against state owned by the old one.
    fn install(
        &self,
        pending: &PendingDecisions,
        registry: &ConnectionRegistry,
    ) -> (ChannelHandle, mpsc::Receiver<Message>) {
        let mut slot = self.current.lock().expect("manager slot poisoned");
        if let Some(old) = slot.take() {
            let failed = pending.fail_all();
            let closed = registry.close_all();
            let _ = old.outbound.try_send(Message::Close(None));
            warn!(
                generation = old.generation,
                failed_rpcs = failed,
                closed_tunnels = closed,
                "manager channel superseded by a new upgrade"
            );
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let handle = ChannelHandle {
            generation,
            outbound: tx,
        };
        *slot = Some(handle.clone());
        (handle, rx)
    }

    /// Tear down the channel installed under `generation`. No-op when a newer
    /// channel has already superseded it. Returns whether teardown ran.
    fn teardown(
        &self,
        generation: u64,
        pending: &PendingDecisions,
        registry: &ConnectionRegistry,
    ) -> bool {
        {
            let mut slot = self.current.lock().expect("manager slot poisoned");
            match slot.as_ref() {
                Some(handle) if handle.generation == generation => *slot = None,
                _ => return false,
            }
        }
        let failed = pending.fail_all();
        let closed = registry.close_all();
        info!(
            generation,
            failed_rpcs = failed,
            closed_tunnels = closed,
            "manager channel torn down"
        );
        true
    }
}

/// Drive an authenticated manager WebSocket until it dies. Called by the
/// upgrade gate; owns the channel for its whole lifetime.
pub async fn run_channel(relay: Arc<Relay>, socket: WebSocket) {
    let (handle, outbound_rx) = relay.manager.install(&relay.pending, &relay.registry);
    let generation = handle.generation;
    info!(generation, "manager channel connected");
    metrics::record_manager_connected(true);

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(outbound_rx, sink));

    let reason = read_loop(&relay, &handle, stream).await;

    if relay.manager.teardown(generation, &relay.pending, &relay.registry) {
        warn!(generation, reason, "manager channel lost");
        metrics::record_manager_connected(false);
    } else {
        debug!(generation, reason, "superseded manager channel finished");
    }
    drop(handle);
    writer.abort();
}

/// Drain the outbound queue into the WebSocket sink. All writes flow through
/// here, so frames never interleave on the wire and transport backpressure
/// propagates to every sender.
async fn write_loop(mut rx: mpsc::Receiver<Message>, mut sink: SplitSink<WebSocket, Message>) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Read inbound frames and run the keepalive clock. Returns the reason the
/// channel ended.
async fn read_loop(
    relay: &Relay,
    handle: &ChannelHandle,
    mut stream: SplitStream<WebSocket>,
) -> &'static str {
    let mut keepalive = tokio::time::interval(relay.config.keepalive());
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    keepalive.tick().await; // the first tick completes immediately
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                if awaiting_pong {
                    return "keepalive probe unacknowledged";
                }
                if handle.send_raw(Message::Ping(Bytes::new())).await.is_err() {
                    return "writer task gone";
                }
                awaiting_pong = true;
            }
            inbound = stream.next() => match inbound {
                None => return "transport closed",
                Some(Err(err)) => {
                    debug!(error = %err, "manager transport error");
                    return "transport error";
                }
                Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                Some(Ok(Message::Ping(payload))) => {
                    if handle.send_raw(Message::Pong(payload)).await.is_err() {
                        return "writer task gone";
                    }
                }
                Some(Ok(Message::Close(_))) => return "manager sent close",
                Some(Ok(Message::Text(text))) => dispatch_frame(relay, text.as_str()).await,
                Some(Ok(Message::Binary(_))) => {
                    debug!("ignoring binary frame from manager");
                }
            }
        }
    }
}

/// Route one inbound frame. Decode failures and frames for unknown ids are
/// dropped; nothing a manager sends can take the relay down.
async fn dispatch_frame(relay: &Relay, raw: &str) {
    let frame = match frames::decode(raw) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "dropping undecodable control frame");
            metrics::record_frame_decode_error();
            return;
        }
    };

    match frame {
        ControlFrame::Decision(decision) => {
            let id = decision.id.clone();
            if !relay.pending.complete(&id, decision) {
                debug!("late or unmatched decision dropped");
            }
        }
        ControlFrame::Data(data) => match relay.registry.lookup(&data.id) {
            Some(commands) => {
                if commands
                    .send(TunnelCommand::Write(Bytes::from(data.data)))
                    .await
                    .is_err()
                {
                    debug!(id = %data.id, "data frame for closing tunnel dropped");
                }
            }
            None => debug!(id = %data.id, "data frame for unknown connection dropped"),
        },
        ControlFrame::End { id } => {
            if let Some(commands) = relay.registry.lookup(&id) {
                let _ = commands.send(TunnelCommand::Shutdown).await;
            }
            relay.registry.unregister(&id);
        }
        ControlFrame::ReviewRequest(_) | ControlFrame::ResponseReview(_) => {
            debug!("ignoring relay-originated frame type from manager");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_supersedes_and_fails_dependents() {
        let slot = ManagerSlot::new();
        let pending = PendingDecisions::new();
        let registry = ConnectionRegistry::new();

        let (first, _outbound_first) = slot.install(&pending, &registry);
        let waiter = pending.register("w".into());
        let (tunnel_tx, mut tunnel_rx) = mpsc::channel(4);
        registry.register(tunnel_tx);

        let (second, _outbound_second) = slot.install(&pending, &registry);
        assert!(second.generation > first.generation);

        // The old channel's dependents fail before the new one is visible.
        assert!(waiter.await.is_err());
        assert!(matches!(tunnel_rx.recv().await, Some(TunnelCommand::Shutdown)));
        assert_eq!(pending.len(), 0);
        assert!(registry.is_empty());
        assert_eq!(
            slot.current().map(|handle| handle.generation),
            Some(second.generation)
        );
    }

    #[tokio::test]
    async fn teardown_of_superseded_generation_is_noop() {
        let slot = ManagerSlot::new();
        let pending = PendingDecisions::new();
        let registry = ConnectionRegistry::new();

        let (first, _rx_first) = slot.install(&pending, &registry);
        let (second, _rx_second) = slot.install(&pending, &registry);

        assert!(!slot.teardown(first.generation, &pending, &registry));
        assert!(slot.is_connected());

        let waiter = pending.register("w".into());
        assert!(slot.teardown(second.generation, &pending, &registry));
        assert!(waiter.await.is_err());
        assert!(slot.current().is_none());
    }
}
