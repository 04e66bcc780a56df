//! Per-connection handler slot
//!
//! Each accepted connection carries a [`ConnectionSlot`] that is either
//! dispatching requests normally or owned by one streaming session. While a
//! session owns the slot, new requests on that connection wait in
//! [`pause_while_streaming`] until the session hands the slot back. The hand
//! back happens exactly once, through [`Takeover`], on completion, abort or
//! client disconnect.

use axum::{
    extract::{connect_info::Connected, ConnectInfo, Request},
    middleware::Next,
    response::Response,
    serve::IncomingStream,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

/// Who is currently driving a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    /// Default dispatcher: requests are read and routed
    Dispatching,
    /// A streaming session owns the connection's output
    Streaming { session_id: u64 },
}

#[derive(Debug)]
pub struct ConnectionSlot {
    state: Mutex<HandlerState>,
    released: Notify,
    takeovers: AtomicU64,
    restores: AtomicU64,
}

impl ConnectionSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HandlerState::Dispatching),
            released: Notify::new(),
            takeovers: AtomicU64::new(0),
            restores: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> HandlerState {
        *self.state.lock()
    }

    pub fn is_dispatching(&self) -> bool {
        self.state() == HandlerState::Dispatching
    }

    /// Wait until no session owns the connection
    pub async fn ready(&self) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.is_dispatching() {
                return;
            }
            released.await;
        }
    }

    /// Swap the default dispatcher out for a session, if nothing else owns
    /// the slot
    pub fn try_take_over(self: &Arc<Self>, session_id: u64) -> Option<Takeover> {
        let mut state = self.state.lock();
        if *state != HandlerState::Dispatching {
            return None;
        }
        *state = HandlerState::Streaming { session_id };
        self.takeovers.fetch_add(1, Ordering::Relaxed);
        trace!(session_id, "Connection taken over");

        Some(Takeover {
            slot: Arc::clone(self),
            session_id,
            restored: false,
        })
    }

    /// Take the slot over for a session, waiting for any active session on
    /// the same connection to finish first
    pub async fn take_over(self: &Arc<Self>, session_id: u64) -> Takeover {
        loop {
            if let Some(takeover) = self.try_take_over(session_id) {
                return takeover;
            }
            self.ready().await;
        }
    }

    /// Number of sessions that have owned this connection
    pub fn takeover_count(&self) -> u64 {
        self.takeovers.load(Ordering::Relaxed)
    }

    /// Number of times the default dispatcher was reinstated
    pub fn restore_count(&self) -> u64 {
        self.restores.load(Ordering::Relaxed)
    }

    fn restore(&self, session_id: u64) {
        let mut state = self.state.lock();
        debug_assert_eq!(*state, HandlerState::Streaming { session_id });
        *state = HandlerState::Dispatching;
        drop(state);

        self.restores.fetch_add(1, Ordering::Relaxed);
        trace!(session_id, "Connection restored to dispatcher");
        self.released.notify_waiters();
    }
}

/// Ownership of a connection's slot by one session.
///
/// Restores the dispatcher when consumed by [`Takeover::restore`] or when
/// dropped, whichever comes first.
#[derive(Debug)]
pub struct Takeover {
    slot: Arc<ConnectionSlot>,
    session_id: u64,
    restored: bool,
}

impl Takeover {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn restore(mut self) {
        self.restore_once();
    }

    fn restore_once(&mut self) {
        if !self.restored {
            self.restored = true;
            self.slot.restore(self.session_id);
        }
    }
}

impl Drop for Takeover {
    fn drop(&mut self) {
        self.restore_once();
    }
}

/// Connect info attached to every request on a connection
#[derive(Debug, Clone)]
pub struct ClientConnection {
    pub remote_addr: SocketAddr,
    pub slot: Arc<ConnectionSlot>,
}

impl ClientConnection {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            slot: ConnectionSlot::new(),
        }
    }
}

impl Connected<IncomingStream<'_>> for ClientConnection {
    fn connect_info(target: IncomingStream<'_>) -> Self {
        ClientConnection::new(target.remote_addr())
    }
}

/// Slot for the connection a request arrived on. Requests without connect
/// info get a private slot.
pub fn slot_for(conn: Option<&ConnectInfo<ClientConnection>>) -> Arc<ConnectionSlot> {
    conn.map(|ConnectInfo(c)| Arc::clone(&c.slot))
        .unwrap_or_else(ConnectionSlot::new)
}

/// Hold new requests on a connection while a session streams on it
pub async fn pause_while_streaming(
    conn: Option<ConnectInfo<ClientConnection>>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(ConnectInfo(conn)) = conn {
        if !conn.slot.is_dispatching() {
            trace!(remote = %conn.remote_addr, "Request paused until active session finishes");
        }
        conn.slot.ready().await;
    }

    next.run(req).await
}
