//! The connection state machine's actor task: owns the underlying
//! `WebSocketStream` and is the only place that mutates per-connection
//! timers. Spawned once per `Connection` by `client::connect` / the
//! acceptor's upgrade handler (`server::from_upgraded`).

use super::events::{ConnectionErrorEvent, ConnectionEvent, MessageEvent};
use super::options::ConnectionOptions;
use super::shared::{Command, ConnectionShared};
use super::state::{ConnectionState, Role};
use crate::close_code;
use crate::codec;
use crate::crypto;
use crate::envelope::{self, Envelope};
use crate::error::{ConnectionError, HandshakeErrorCode, InvalidMsgErrorCode};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// One-shot timer bookkeeping. Exactly one of these is armed at a time in
/// practice (handshake during `Opening`, ping during client `Open`, close
/// during `Closing`), but they are tracked independently since nothing
/// prevents, say, a close timer and a (stale) ping timer coexisting for one
/// tick.
#[derive(Default)]
struct Timers {
    handshake: Option<Instant>,
    ping: Option<Instant>,
    close: Option<Instant>,
    /// Set once this side has acked a peer-initiated `cwdtp::close` and is
    /// passively waiting for the underlying WebSocket to actually close
    /// (spec §4.D: the non-initiating peer finalizes `Closed` "when the
    /// underlying WebSocket closes", not on its own initiative). Carries the
    /// `(was_error, reason)` to report on that final `close` event.
    peer_close: Option<(bool, String)>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant.into()).await,
        None => std::future::pending().await,
    }
}

pub(crate) struct ActorParams<S> {
    pub ws: WebSocketStream<S>,
    pub role: Role,
    pub shared: Arc<ConnectionShared>,
    pub opts: ConnectionOptions,
    pub cmd_rx: mpsc::UnboundedReceiver<Command>,
    pub lifecycle_tx: mpsc::UnboundedSender<ConnectionEvent>,
    pub message_tx: mpsc::UnboundedSender<MessageEvent>,
    /// Client role only: the `req_key` this side generated and sent, used
    /// to validate the server's `res_key`.
    pub client_req_key: Option<String>,
}

pub(crate) async fn run<S>(params: ActorParams<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ActorParams {
        mut ws,
        role,
        shared,
        opts,
        mut cmd_rx,
        lifecycle_tx,
        message_tx,
        client_req_key,
    } = params;

    let mut timers = Timers::default();
    timers.handshake = Some(Instant::now() + opts.handshake_timeout);

    if role == Role::Client {
        let req_key = client_req_key.expect("client role always carries its req_key");
        let mut meta = Map::new();
        meta.insert("req_key".to_string(), Value::String(req_key));
        let hello = Envelope::new(envelope::EVENT_CLIENT_HELLO, meta, vec![]);
        if send_envelope(&mut ws, &hello).await.is_err() {
            finish(&shared, &lifecycle_tx, ConnectionState::Error, ConnectionEvent::Error(ConnectionErrorEvent::ConnectionReset)).await;
            return;
        }
    }

    loop {
        tokio::select! {
            frame = ws.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        if !handle_message(
                            msg,
                            &mut ws,
                            role,
                            &shared,
                            &opts,
                            &mut timers,
                            &client_req_key,
                            &lifecycle_tx,
                            &message_tx,
                        ).await {
                            break;
                        }
                    }
                    Some(Err(_)) | None => {
                        handle_unsolicited_close(&mut ws, &shared, &mut timers, &lifecycle_tx, None).await;
                        break;
                    }
                }
            }
            _ = sleep_until_opt(timers.handshake) => {
                timers.handshake = None;
                let _ = ws.close(Some(CloseFrame { code: CloseCode::from(close_code::HANDSHAKE_TIMEOUT), reason: "Handshake timeout".into() })).await;
                finish(&shared, &lifecycle_tx, ConnectionState::TimedOut, ConnectionEvent::HandshakeTimeout).await;
                break;
            }
            _ = sleep_until_opt(timers.ping), if role == Role::Client => {
                timers.ping = None;
                let _ = ws.close(Some(CloseFrame { code: CloseCode::from(close_code::NORMAL), reason: "Pong timeout".into() })).await;
                finish(&shared, &lifecycle_tx, ConnectionState::Closed, ConnectionEvent::PingTimeout).await;
                break;
            }
            _ = sleep_until_opt(timers.close) => {
                timers.close = None;
                let _ = ws.close(None).await;
                finish(&shared, &lifecycle_tx, ConnectionState::TimedOut, ConnectionEvent::CloseTimeout).await;
                break;
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => {
                        if !handle_command(cmd, &mut ws, &shared, &mut timers, &opts, &lifecycle_tx).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

/// Returns `false` when the actor loop should stop.
#[allow(clippy::too_many_arguments)]
async fn handle_command<S>(
    cmd: Command,
    ws: &mut WebSocketStream<S>,
    shared: &Arc<ConnectionShared>,
    timers: &mut Timers,
    opts: &ConnectionOptions,
    lifecycle_tx: &mpsc::UnboundedSender<ConnectionEvent>,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match cmd {
        Command::Send { event, data, ack } => {
            if shared.state() != ConnectionState::Open {
                let _ = ack.send(Err(ConnectionError::NotConnected));
                return true;
            }
            let envelope = Envelope::new(event, Map::new(), data);
            let result = send_envelope(ws, &envelope)
                .await
                .map_err(|_| ConnectionError::NotConnected);
            let _ = ack.send(result);
            true
        }
        Command::Disconnect { code, reason, ack } => {
            if shared.state() != ConnectionState::Open {
                let _ = ack.send(Err(ConnectionError::NotConnected));
                return true;
            }
            let _ = lifecycle_tx.send(ConnectionEvent::Closing {
                reason: reason.clone(),
            });
            shared.set_state(ConnectionState::Closing);
            let mut meta = Map::new();
            meta.insert("error".to_string(), Value::Bool(false));
            meta.insert("reason".to_string(), Value::String(reason.clone()));
            let envelope = Envelope::new(envelope::EVENT_CLOSE, meta, vec![]);
            let _ = send_envelope(ws, &envelope).await;
            timers.close = Some(Instant::now() + opts.close_timeout);
            // Stash the peer close code so the close-ack branch can apply it.
            shared.pending_close_code.store(code, std::sync::atomic::Ordering::SeqCst);
            let _ = ack.send(Ok(()));
            true
        }
        Command::Terminate { code, reason, ack } => {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            };
            let _ = ws.close(Some(frame)).await;
            timers.handshake = None;
            timers.ping = None;
            timers.close = None;
            shared.set_state(ConnectionState::Closed);
            let _ = ack.send(Ok(()));
            false
        }
        Command::HeartbeatPing => {
            if shared.state() == ConnectionState::Open {
                shared.is_alive.store(false, std::sync::atomic::Ordering::SeqCst);
                let envelope = Envelope::bare(envelope::EVENT_PING);
                let _ = send_envelope(ws, &envelope).await;
            }
            true
        }
        Command::HeartbeatKill => {
            warn!(id = ?shared.id(), "missed heartbeat, terminating");
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::from(close_code::PONG_TIMEOUT),
                    reason: "Pong timeout".into(),
                }))
                .await;
            timers.handshake = None;
            timers.ping = None;
            timers.close = None;
            shared.set_state(ConnectionState::Closed);
            false
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_message<S>(
    msg: Message,
    ws: &mut WebSocketStream<S>,
    role: Role,
    shared: &Arc<ConnectionShared>,
    opts: &ConnectionOptions,
    timers: &mut Timers,
    client_req_key: &Option<String>,
    lifecycle_tx: &mpsc::UnboundedSender<ConnectionEvent>,
    message_tx: &mpsc::UnboundedSender<MessageEvent>,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match msg {
        Message::Text(text) => {
            handle_text(
                &text,
                ws,
                role,
                shared,
                opts,
                timers,
                client_req_key,
                lifecycle_tx,
                message_tx,
            )
            .await
        }
        Message::Binary(_) => {
            let _ = lifecycle_tx.send(ConnectionEvent::Error(ConnectionErrorEvent::InvalidMsg(
                InvalidMsgErrorCode::UnexpectedBinary,
            )));
            shared.set_state(ConnectionState::Error);
            timers.handshake = None;
            timers.ping = None;
            timers.close = None;
            true
        }
        Message::Close(frame) => {
            let reason = frame.map(|f| f.reason.to_string());
            handle_unsolicited_close(ws, shared, timers, lifecycle_tx, reason).await;
            false
        }
        Message::Ping(_) | Message::Pong(_) => true,
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_text<S>(
    text: &str,
    ws: &mut WebSocketStream<S>,
    role: Role,
    shared: &Arc<ConnectionShared>,
    opts: &ConnectionOptions,
    timers: &mut Timers,
    client_req_key: &Option<String>,
    lifecycle_tx: &mpsc::UnboundedSender<ConnectionEvent>,
    message_tx: &mpsc::UnboundedSender<MessageEvent>,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let parsed = match Envelope::parse(text) {
        Ok(e) => e,
        Err(_) => {
            let _ = lifecycle_tx.send(ConnectionEvent::Error(ConnectionErrorEvent::InvalidMsg(
                InvalidMsgErrorCode::InvalidCwdtp,
            )));
            shared.set_state(ConnectionState::Error);
            return true;
        }
    };

    if parsed.event.is_empty() {
        let _ = lifecycle_tx.send(ConnectionEvent::Error(ConnectionErrorEvent::InvalidMsg(
            InvalidMsgErrorCode::InvalidCwdtp,
        )));
        shared.set_state(ConnectionState::Error);
        return true;
    }

    match shared.state() {
        ConnectionState::Opening => {
            handle_handshake_envelope(&parsed, ws, role, shared, timers, client_req_key, lifecycle_tx).await
        }
        ConnectionState::Open | ConnectionState::Closing => {
            handle_open_envelope(&parsed, ws, role, shared, opts, timers, lifecycle_tx, message_tx).await
        }
        ConnectionState::Closed | ConnectionState::Error | ConnectionState::TimedOut => true,
    }
}

async fn handle_handshake_envelope<S>(
    envelope: &Envelope,
    ws: &mut WebSocketStream<S>,
    role: Role,
    shared: &Arc<ConnectionShared>,
    timers: &mut Timers,
    client_req_key: &Option<String>,
    lifecycle_tx: &mpsc::UnboundedSender<ConnectionEvent>,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match role {
        Role::Server => match envelope.event.as_str() {
            e if e == envelope::EVENT_CLIENT_HELLO => {
                let req_key = match envelope.meta.get("req_key").and_then(Value::as_str) {
                    Some(k) => k.to_string(),
                    None => {
                        let _ = lifecycle_tx.send(ConnectionEvent::Error(ConnectionErrorEvent::Handshake(
                            HandshakeErrorCode::InvalidCwdtpMsg,
                        )));
                        shared.set_state(ConnectionState::Error);
                        return true;
                    }
                };
                let res_key = crypto::derive_res_key(&req_key);
                let cid = uuid::Uuid::new_v4().to_string();
                shared.set_id(cid.clone());
                let mut meta = Map::new();
                meta.insert("res_key".to_string(), Value::String(res_key));
                meta.insert("cid".to_string(), Value::String(cid));
                let hello = Envelope::new(envelope::EVENT_SERVER_HELLO, meta, vec![]);
                if send_envelope(ws, &hello).await.is_err() {
                    return false;
                }
                true
            }
            e if e == envelope::EVENT_SERVER_HELLO_ACK => {
                timers.handshake = None;
                shared.set_state(ConnectionState::Open);
                shared.is_alive.store(true, std::sync::atomic::Ordering::SeqCst);
                debug!(id = ?shared.id(), "server connection open");
                let _ = lifecycle_tx.send(ConnectionEvent::Open);
                true
            }
            _ => {
                let _ = lifecycle_tx.send(ConnectionEvent::Error(ConnectionErrorEvent::Handshake(
                    HandshakeErrorCode::InvalidCwdtpMsg,
                )));
                shared.set_state(ConnectionState::Error);
                true
            }
        },
        Role::Client => match envelope.event.as_str() {
            e if e == envelope::EVENT_SERVER_HELLO => {
                let res_key = envelope.meta.get("res_key").and_then(Value::as_str);
                let cid = envelope.meta.get("cid").and_then(Value::as_str);
                let (res_key, cid) = match (res_key, cid) {
                    (Some(r), Some(c)) => (r, c),
                    (None, _) => {
                        emit_handshake_failure(ws, shared, lifecycle_tx, HandshakeErrorCode::InvalidResKey).await;
                        return false;
                    }
                    (_, None) => {
                        emit_handshake_failure(ws, shared, lifecycle_tx, HandshakeErrorCode::MissingConnId).await;
                        return false;
                    }
                };
                let req_key = client_req_key.as_deref().unwrap_or_default();
                let expected = crypto::derive_res_key(req_key);
                if expected != res_key {
                    emit_handshake_failure(ws, shared, lifecycle_tx, HandshakeErrorCode::InvalidResKey).await;
                    return false;
                }
                shared.set_id(cid.to_string());
                let ack = Envelope::bare(envelope::EVENT_SERVER_HELLO_ACK);
                if send_envelope(ws, &ack).await.is_err() {
                    return false;
                }
                timers.handshake = None;
                shared.set_state(ConnectionState::Open);
                shared.is_alive.store(true, std::sync::atomic::Ordering::SeqCst);
                debug!(id = %cid, "client connection open");
                let _ = lifecycle_tx.send(ConnectionEvent::Open);
                true
            }
            _ => {
                emit_handshake_failure(ws, shared, lifecycle_tx, HandshakeErrorCode::InvalidCwdtpMsg).await;
                false
            }
        },
    }
}

async fn emit_handshake_failure<S>(
    ws: &mut WebSocketStream<S>,
    shared: &Arc<ConnectionShared>,
    lifecycle_tx: &mpsc::UnboundedSender<ConnectionEvent>,
    code: HandshakeErrorCode,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    warn!(code = code.as_str(), "handshake failed");
    let _ = lifecycle_tx.send(ConnectionEvent::Error(ConnectionErrorEvent::Handshake(code)));
    shared.set_state(ConnectionState::Error);
    let _ = ws.close(None).await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_open_envelope<S>(
    envelope: &Envelope,
    ws: &mut WebSocketStream<S>,
    role: Role,
    shared: &Arc<ConnectionShared>,
    opts: &ConnectionOptions,
    timers: &mut Timers,
    lifecycle_tx: &mpsc::UnboundedSender<ConnectionEvent>,
    message_tx: &mpsc::UnboundedSender<MessageEvent>,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match envelope.event.as_str() {
        e if e == envelope::EVENT_PING && role == Role::Client => {
            let pong = Envelope::bare(envelope::EVENT_PONG);
            let _ = send_envelope(ws, &pong).await;
            timers.ping = Some(Instant::now() + opts.ping_timeout);
            true
        }
        e if e == envelope::EVENT_PONG && role == Role::Server => {
            shared.is_alive.store(true, std::sync::atomic::Ordering::SeqCst);
            true
        }
        e if e == envelope::EVENT_CLOSE => {
            let reason = envelope
                .meta
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let was_error = envelope
                .meta
                .get("error")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let already_closing = shared.state() == ConnectionState::Closing;
            let _ = lifecycle_tx.send(ConnectionEvent::Closing {
                reason: reason.clone(),
            });
            shared.set_state(ConnectionState::Closing);
            let ack = Envelope::bare(envelope::EVENT_CLOSE_ACK);
            let _ = send_envelope(ws, &ack).await;
            if !already_closing {
                // We are the non-initiating peer: per spec §4.D we ack and
                // then passively wait for the underlying WebSocket to
                // actually close (driven by the initiator), finalizing
                // `Closed`/`Close` from `handle_unsolicited_close` once it
                // does, rather than closing the transport ourselves here.
                timers.peer_close = Some((was_error, reason));
            }
            true
        }
        e if e == envelope::EVENT_CLOSE_ACK => {
            let code = shared
                .pending_close_code
                .load(std::sync::atomic::Ordering::SeqCst);
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::from(code),
                    reason: "".into(),
                }))
                .await;
            timers.close = None;
            shared.set_state(ConnectionState::Closed);
            let _ = lifecycle_tx.send(ConnectionEvent::Close {
                was_error: false,
                reason: String::new(),
            });
            false
        }
        other if envelope::is_reserved(other) => true,
        other => match codec::decode_data(&envelope.data) {
            Ok(data) => {
                let _ = message_tx.send(MessageEvent {
                    event: other.to_string(),
                    data,
                });
                true
            }
            Err(code) => {
                let _ = lifecycle_tx.send(ConnectionEvent::Error(ConnectionErrorEvent::InvalidMsg(code)));
                shared.set_state(ConnectionState::Error);
                true
            }
        },
    }
}

async fn handle_unsolicited_close<S>(
    ws: &mut WebSocketStream<S>,
    shared: &Arc<ConnectionShared>,
    timers: &mut Timers,
    lifecycle_tx: &mpsc::UnboundedSender<ConnectionEvent>,
    reason: Option<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _ = ws.close(None).await;
    match shared.state() {
        ConnectionState::Opening => {
            shared.set_state(ConnectionState::Error);
            timers.handshake = None;
            let _ = lifecycle_tx.send(ConnectionEvent::Error(ConnectionErrorEvent::ConnectionReset));
        }
        ConnectionState::Open | ConnectionState::Closing => {
            shared.set_state(ConnectionState::Closed);
            timers.handshake = None;
            timers.ping = None;
            timers.close = None;
            // If we already acked a peer-initiated `cwdtp::close`, report
            // the `(was_error, reason)` carried by that envelope rather than
            // whatever the underlying close frame itself says.
            let (was_error, reason) = match timers.peer_close.take() {
                Some(stashed) => stashed,
                None => (true, reason.unwrap_or_default()),
            };
            let _ = lifecycle_tx.send(ConnectionEvent::Close { was_error, reason });
        }
        _ => {}
    }
}

async fn finish(
    shared: &Arc<ConnectionShared>,
    lifecycle_tx: &mpsc::UnboundedSender<ConnectionEvent>,
    state: ConnectionState,
    event: ConnectionEvent,
) {
    shared.set_state(state);
    let _ = lifecycle_tx.send(event);
}

async fn send_envelope<S>(
    ws: &mut WebSocketStream<S>,
    envelope: &Envelope,
) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = envelope
        .to_json_text()
        .expect("envelope fields are always JSON-serializable");
    ws.send(Message::Text(text)).await
}

pub(crate) fn spawn<S>(params: ActorParams<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(run(params));
}
