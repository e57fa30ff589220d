//! The CWDTP connection state machine (spec §4.D), both roles.
//!
//! A [`Connection`] is a single-owner handle: it is driven by a background
//! actor task (`actor::run`) that owns the underlying WebSocket, and the
//! handle communicates with it over channels — commands flow in
//! (`send`/`disconnect`/`terminate`), and two independent event streams
//! flow out: the lifecycle emitter (`recv_event`) and the message-router
//! (`recv_message`), matching spec §3's note that the message-router is "a
//! secondary event dispatcher distinct from the connection's lifecycle
//! emitter".

mod actor;
pub mod client;
mod events;
mod options;
pub mod server;
mod shared;
mod state;

pub use events::{ConnectionErrorEvent, ConnectionEvent, MessageEvent};
pub use options::ConnectionOptions;
pub use shared::ConnectionHandle;
pub use state::{ConnectionState, Role};

use crate::codec::Arg;
use crate::error::ConnectionError;
use shared::{Command, ConnectionShared};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A single CWDTP peer session over one underlying WebSocket.
///
/// Construct a client-role connection with [`client::connect`]; server-role
/// connections are constructed by [`crate::acceptor::Acceptor`] and handed
/// to the application via [`crate::acceptor::AcceptorEvent::Connection`].
#[derive(Debug)]
pub struct Connection {
    shared: Arc<ConnectionShared>,
    lifecycle_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    message_rx: mpsc::UnboundedReceiver<MessageEvent>,
}

impl Connection {
    pub(crate) fn new(
        shared: Arc<ConnectionShared>,
        lifecycle_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
        message_rx: mpsc::UnboundedReceiver<MessageEvent>,
    ) -> Self {
        Connection {
            shared,
            lifecycle_rx,
            message_rx,
        }
    }

    /// The opaque connection id. Non-`None` iff this connection has ever
    /// entered `Open` (spec §3 invariant).
    pub fn id(&self) -> Option<String> {
        self.shared.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// A cloneable reference usable by an [`crate::acceptor::Acceptor`]'s
    /// fleet for heartbeat sweeps and bulk disconnects, without consuming
    /// this connection's event streams.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shared: self.shared.clone(),
        }
    }

    /// Awaits the next lifecycle notification. Returns `None` once the
    /// actor task has exited (always preceded by a terminal event).
    pub async fn recv_event(&mut self) -> Option<ConnectionEvent> {
        self.lifecycle_rx.recv().await
    }

    /// Awaits the next non-reserved peer event delivered on the
    /// message-router.
    pub async fn recv_message(&mut self) -> Option<MessageEvent> {
        self.message_rx.recv().await
    }

    /// Sends an application event. Fails with `NotConnected` if not
    /// currently `Open`, `InvalidEventName` if `event` is empty or reserved
    /// (spec §4.C).
    pub async fn send(&self, event: impl Into<String>, args: Vec<Arg>) -> Result<(), ConnectionError> {
        let event = event.into();
        crate::envelope::validate_event_name(&event)
            .map_err(ConnectionError::InvalidEventName)?;
        let data = crate::codec::encode_args(&args);
        let (ack_tx, ack_rx) = oneshot::channel();
        self.shared
            .cmd_tx
            .send(Command::Send {
                event,
                data,
                ack: ack_tx,
            })
            .map_err(|_| ConnectionError::NotConnected)?;
        ack_rx.await.map_err(|_| ConnectionError::NotConnected)?
    }

    /// Begins the closing handshake (spec §4.D "Closing handshake").
    /// Fails with `NotConnected` unless currently `Open`.
    pub async fn disconnect(&self, code: u16, reason: impl Into<String>) -> Result<(), ConnectionError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.shared
            .cmd_tx
            .send(Command::Disconnect {
                code,
                reason: reason.into(),
                ack: ack_tx,
            })
            .map_err(|_| ConnectionError::NotConnected)?;
        ack_rx.await.map_err(|_| ConnectionError::NotConnected)?
    }

    /// Forced termination (spec §4.D "Forced termination"). Idempotent;
    /// always transitions to `Closed`.
    pub async fn terminate(&self, code: u16, reason: impl Into<String>) -> Result<(), ConnectionError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.shared
            .cmd_tx
            .send(Command::Terminate {
                code,
                reason: reason.into(),
                ack: ack_tx,
            })
            .map_err(|_| ConnectionError::NotConnected)?;
        ack_rx.await.map_err(|_| ConnectionError::NotConnected)?
    }
}
