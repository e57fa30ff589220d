//! State shared between a [`super::Connection`] and its lightweight,
//! cloneable [`ConnectionHandle`] (used by the acceptor's fleet to run
//! heartbeat sweeps without needing to consume the connection's events).

use super::state::{ConnectionState, Role};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Commands the handle (or the connection itself) sends to the actor task
/// that owns the underlying WebSocket.
#[derive(Debug)]
pub(crate) enum Command {
    Send {
        event: String,
        data: Vec<serde_json::Value>,
        ack: tokio::sync::oneshot::Sender<Result<(), crate::error::ConnectionError>>,
    },
    Disconnect {
        code: u16,
        reason: String,
        ack: tokio::sync::oneshot::Sender<Result<(), crate::error::ConnectionError>>,
    },
    Terminate {
        code: u16,
        reason: String,
        ack: tokio::sync::oneshot::Sender<Result<(), crate::error::ConnectionError>>,
    },
    /// Sent internally by the acceptor's fleet heartbeat sweep.
    HeartbeatPing,
    /// Sent internally when the fleet sweep finds `is_alive == false`.
    HeartbeatKill,
}

#[derive(Debug)]
pub(crate) struct ConnectionShared {
    pub(crate) role: Role,
    pub(crate) state: RwLock<ConnectionState>,
    pub(crate) id: RwLock<Option<String>>,
    pub(crate) is_alive: AtomicBool,
    pub(crate) cmd_tx: mpsc::UnboundedSender<Command>,
    /// Close code the initiator asked for via `disconnect(code, reason)`,
    /// applied to the underlying WebSocket once the peer's `close-ack`
    /// arrives (spec §4.D's closing handshake).
    pub(crate) pending_close_code: AtomicU16,
}

impl ConnectionShared {
    pub(crate) fn new(role: Role, cmd_tx: mpsc::UnboundedSender<Command>) -> Arc<Self> {
        Arc::new(ConnectionShared {
            role,
            state: RwLock::new(ConnectionState::Opening),
            id: RwLock::new(None),
            is_alive: AtomicBool::new(false),
            cmd_tx,
            pending_close_code: AtomicU16::new(crate::close_code::GOING_AWAY),
        })
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap() = state;
    }

    pub(crate) fn id(&self) -> Option<String> {
        self.id.read().unwrap().clone()
    }

    pub(crate) fn set_id(&self, id: String) {
        *self.id.write().unwrap() = Some(id);
    }
}

/// A cloneable, non-event-consuming reference to a connection. Used by the
/// acceptor to track the fleet and drive the heartbeat sweep (spec §3
/// "Fleet") and to implement `disconnectAll`.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub(crate) shared: Arc<ConnectionShared>,
}

impl ConnectionHandle {
    pub fn id(&self) -> Option<String> {
        self.shared.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_alive(&self) -> bool {
        self.shared.is_alive.load(Ordering::SeqCst)
    }

    pub fn set_alive(&self, alive: bool) {
        self.shared.is_alive.store(alive, Ordering::SeqCst);
    }

    /// Part of the fleet sweep: mark not-alive and ask the actor to send
    /// `cwdtp::ping`.
    pub(crate) fn send_heartbeat_ping(&self) {
        let _ = self.shared.cmd_tx.send(Command::HeartbeatPing);
    }

    /// Part of the fleet sweep: the connection failed to respond with
    /// `cwdtp::pong` within the interval; terminate with code 4004.
    pub(crate) fn kill_for_missed_heartbeat(&self) {
        let _ = self.shared.cmd_tx.send(Command::HeartbeatKill);
    }

    /// Used by `Acceptor::disconnectAll`/`detach`.
    pub fn disconnect(&self, code: u16, reason: impl Into<String>) {
        let (ack, _) = tokio::sync::oneshot::channel();
        let _ = self.shared.cmd_tx.send(Command::Disconnect {
            code,
            reason: reason.into(),
            ack,
        });
    }
}
