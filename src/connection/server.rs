//! Server-role connection construction (spec §4.D "Server-role connection").
//!
//! Invoked by [`crate::acceptor::Acceptor`] once it has completed the RFC
//! 6455 upgrade; this module only wraps the already-upgraded socket in the
//! CWDTP state machine.

use super::actor::{self, ActorParams};
use super::events::{ConnectionEvent, MessageEvent};
use super::options::ConnectionOptions;
use super::shared::{Command, ConnectionShared};
use super::state::Role;
use super::Connection;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;

/// Wraps an already-upgraded WebSocket in a server-role `Connection` and
/// starts the opening handshake (spec §4.D step 1: arm the handshake timer
/// and wait for `cwdtp::client-hello`).
pub(crate) fn from_upgraded<S>(ws: WebSocketStream<S>, opts: ConnectionOptions) -> Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel::<ConnectionEvent>();
    let (message_tx, message_rx) = mpsc::unbounded_channel::<MessageEvent>();

    let shared = ConnectionShared::new(Role::Server, cmd_tx);

    actor::spawn(ActorParams {
        ws,
        role: Role::Server,
        shared: shared.clone(),
        opts,
        cmd_rx,
        lifecycle_tx,
        message_tx,
        client_req_key: None,
    });

    Connection::new(shared, lifecycle_rx, message_rx)
}
