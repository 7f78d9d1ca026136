//! Connection registry for relayed CONNECT tunnels.
//!
//! Maps connection id → the command channel of the task that owns the client
//! socket. Ids come from a process-monotonic counter rendered as text. A
//! lookup hands back a sender clone, so the socket write itself never happens
//! under the map lock. Looking up an id that was just unregistered is a
//! benign race; callers drop the frame.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Commands delivered to the task owning a tunneled client socket.
#[derive(Debug)]
pub enum TunnelCommand {
    /// Write these bytes to the client.
    Write(Bytes),
    /// Close the client socket; its partner state is gone.
    Shutdown,
}

/// Live tunnel connections keyed by connection id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    tunnels: DashMap<String, mpsc::Sender<TunnelCommand>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tunnel and allocate its connection id.
    pub fn register(&self, commands: mpsc::Sender<TunnelCommand>) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        self.tunnels.insert(id.clone(), commands);
        id
    }

    /// Command channel for a live tunnel, if the id is still registered.
    pub fn lookup(&self, id: &str) -> Option<mpsc::Sender<TunnelCommand>> {
        self.tunnels.get(id).map(|entry| entry.value().clone())
    }

    /// Remove a tunnel. Returns false when the id was already gone.
    pub fn unregister(&self, id: &str) -> bool {
        self.tunnels.remove(id).is_some()
    }

    /// Close every registered tunnel and clear the registry. Invoked on
    /// manager-channel teardown so client sockets are closed, not stranded.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        self.tunnels.retain(|_, commands| {
            // A full command queue still closes: dropping the registry's
            // sender lets the tunnel task observe the channel ending.
            let _ = commands.try_send(TunnelCommand::Shutdown);
            closed += 1;
            false
        });
        closed
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }
}
