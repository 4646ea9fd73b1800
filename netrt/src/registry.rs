//! The server-wide session registry: a `Mutex<HashMap<...>>` reached only at
//! insert/remove, mirroring `lib_common::core::dispatcher::Dispatcher`'s
//! `Mutex<Vec<ClientHandle>>`. Entries are `Sender` handles into each
//! session's control channel — never the session itself — so `stop()` can
//! reach every live session without sharing any of its mutable state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Identifies one live session for the lifetime of its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Http,
    WebSocket,
}

/// Sent down a session's control channel to ask it to tear itself down.
#[derive(Debug, Clone)]
pub enum ControlMsg {
    Shutdown,
}

/// Frame kind for a broadcast payload (mirrors `ws::session::WsMessageKind`
/// without pulling the `ws` module into this one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsKind {
    Text,
    Binary,
}

/// A broadcast hop: the payload is wrapped once in an `Arc` by the caller and
/// every live WebSocket session receives a clone of the pointer, mirroring
/// `lib_common::core::dispatcher::Dispatcher::broadcast`'s zero-copy fan-out.
#[derive(Debug, Clone)]
pub struct WsBroadcast {
    pub payload: Arc<Vec<u8>>,
    pub kind: WsKind,
}

struct Entry {
    kind: SessionKind,
    sender: mpsc::Sender<ControlMsg>,
    ws_sender: Option<mpsc::UnboundedSender<WsBroadcast>>,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, Entry>>,
}

/// Shared handle; cheap to clone, safe to hold from every connection task.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Inner>,
}

/// Dropped when a session's task ends; removes its registry entry so the
/// registry never outlives the session it describes. This is what replaces
/// the `shared_from_this` ownership cycle in the original: the task owns the
/// session, and the session owns this guard.
pub struct RegistrationGuard {
    id: SessionId,
    registry: Registry,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers a new session, returning its id, a receiver for control
    /// messages addressed to it, and a guard that deregisters it on drop.
    pub fn register(&self, kind: SessionKind) -> (SessionId, mpsc::Receiver<ControlMsg>, RegistrationGuard) {
        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(1);
        self.inner.sessions.lock().expect("session registry mutex poisoned").insert(
            id,
            Entry {
                kind,
                sender: tx,
                ws_sender: None,
            },
        );
        let guard = RegistrationGuard {
            id,
            registry: self.clone(),
        };
        (id, rx, guard)
    }

    /// Registers a WebSocket session, additionally wiring up an unbounded
    /// broadcast channel so `broadcast()` can reach it alongside the regular
    /// control channel.
    pub fn register_ws(
        &self,
    ) -> (
        SessionId,
        mpsc::Receiver<ControlMsg>,
        mpsc::UnboundedReceiver<WsBroadcast>,
        RegistrationGuard,
    ) {
        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(1);
        let (ws_tx, ws_rx) = mpsc::unbounded_channel();
        self.inner.sessions.lock().expect("session registry mutex poisoned").insert(
            id,
            Entry {
                kind: SessionKind::WebSocket,
                sender: tx,
                ws_sender: Some(ws_tx),
            },
        );
        let guard = RegistrationGuard {
            id,
            registry: self.clone(),
        };
        (id, rx, ws_rx, guard)
    }

    fn remove(&self, id: SessionId) {
        self.inner
            .sessions
            .lock()
            .expect("session registry mutex poisoned")
            .remove(&id);
    }

    /// Sends `ControlMsg::Shutdown` to every live session. A session whose
    /// receiver has already been dropped (task ended) is silently skipped;
    /// removal happens via its `RegistrationGuard`, not here.
    pub async fn broadcast_shutdown(&self) {
        let senders: Vec<_> = {
            let sessions = self
                .inner
                .sessions
                .lock()
                .expect("session registry mutex poisoned");
            sessions.values().map(|e| e.sender.clone()).collect()
        };
        for sender in senders {
            let _ = sender.send(ControlMsg::Shutdown).await;
        }
    }

    /// Senders for every session of the given kind.
    pub fn senders_of_kind(&self, kind: SessionKind) -> Vec<mpsc::Sender<ControlMsg>> {
        self.inner
            .sessions
            .lock()
            .expect("session registry mutex poisoned")
            .values()
            .filter(|e| e.kind == kind)
            .map(|e| e.sender.clone())
            .collect()
    }

    /// Wraps `payload` once in an `Arc` and sends a clone of the pointer to
    /// every live WebSocket session, mirroring `Dispatcher::broadcast`'s
    /// zero-copy fan-out. Dead sessions (receiver already dropped) are
    /// skipped here; their entries are reaped by `RegistrationGuard::drop`.
    pub fn broadcast(&self, payload: Vec<u8>, kind: WsKind) {
        let frame = WsBroadcast {
            payload: Arc::new(payload),
            kind,
        };
        let ws_senders: Vec<_> = {
            let sessions = self
                .inner
                .sessions
                .lock()
                .expect("session registry mutex poisoned");
            sessions.values().filter_map(|e| e.ws_sender.clone()).collect()
        };
        for sender in ws_senders {
            let _ = sender.send(frame.clone());
        }
    }

    pub fn live_count(&self) -> usize {
        self.inner
            .sessions
            .lock()
            .expect("session registry mutex poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_remove_on_drop() {
        let registry = Registry::new();
        let (_, _rx, guard) = registry.register(SessionKind::Http);
        assert_eq!(registry.live_count(), 1);
        drop(guard);
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_shutdown_reaches_every_session() {
        let registry = Registry::new();
        let (_, mut rx1, _g1) = registry.register(SessionKind::Http);
        let (_, mut rx2, _g2) = registry.register(SessionKind::WebSocket);
        registry.broadcast_shutdown().await;
        assert!(matches!(rx1.recv().await, Some(ControlMsg::Shutdown)));
        assert!(matches!(rx2.recv().await, Some(ControlMsg::Shutdown)));
    }

    #[tokio::test]
    async fn broadcast_reaches_every_ws_session_but_not_http() {
        let registry = Registry::new();
        let (_, _rx_http, _guard_http) = registry.register(SessionKind::Http);
        let (_, _rx1, mut ws_rx1, _guard1) = registry.register_ws();
        let (_, _rx2, mut ws_rx2, _guard2) = registry.register_ws();

        registry.broadcast(b"hello".to_vec(), WsKind::Text);

        let frame1 = ws_rx1.recv().await.expect("ws session 1 should receive broadcast");
        let frame2 = ws_rx2.recv().await.expect("ws session 2 should receive broadcast");
        assert_eq!(*frame1.payload, b"hello".to_vec());
        assert_eq!(frame1.kind, WsKind::Text);
        assert!(Arc::ptr_eq(&frame1.payload, &frame2.payload));
    }
}
