//! Client-role connection construction (spec §4.D "Client-role connection").

use super::actor::{self, ActorParams};
use super::events::{ConnectionEvent, MessageEvent};
use super::options::ConnectionOptions;
use super::shared::{Command, ConnectionShared};
use super::state::Role;
use super::Connection;
use crate::crypto;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

/// The CWDTP sub-protocol every peer must advertise during the WebSocket
/// upgrade (spec §6).
pub const SUB_PROTOCOL: &str = "pow.cwdtp";

/// Connects to `url` as a CWDTP client: opens a WebSocket advertising the
/// `pow.cwdtp` sub-protocol, then drives the opening handshake (spec §4.D).
/// Resolves once the underlying WebSocket is open; the CWDTP handshake
/// itself completes asynchronously and is reported via the first
/// `ConnectionEvent::Open` on [`Connection::recv_event`].
pub async fn connect(
    url: &str,
    opts: ConnectionOptions,
) -> Result<Connection, tokio_tungstenite::tungstenite::Error> {
    let mut request = url.into_client_request()?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUB_PROTOCOL));

    let (ws, _response) = tokio_tungstenite::connect_async(request).await?;

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel::<ConnectionEvent>();
    let (message_tx, message_rx) = mpsc::unbounded_channel::<MessageEvent>();

    let shared = ConnectionShared::new(Role::Client, cmd_tx);
    let req_key = crypto::generate_req_key();

    actor::spawn(ActorParams {
        ws,
        role: Role::Client,
        shared: shared.clone(),
        opts,
        cmd_rx,
        lifecycle_tx,
        message_tx,
        client_req_key: Some(req_key),
    });

    Ok(Connection::new(shared, lifecycle_rx, message_rx))
}
