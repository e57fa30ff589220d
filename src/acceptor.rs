//! The CWDTP acceptor (spec §4.E): screens incoming WebSocket upgrades,
//! drives each accepted connection through the CWDTP handshake, and runs
//! the fleet heartbeat.
//!
//! Grounded on the teacher's `src/ws/mod.rs` `WebSocketUpgrade<F>`, a
//! `tower::Service<Request<B>>` that inspects the `Connection`/`Upgrade`
//! headers, extracts `Sec-WebSocket-Key`, and spawns a task to run the
//! upgraded socket — generalized here with CWDTP's extra screening gates
//! (path, sub-protocol, CORS, `verifyClient`) ahead of the RFC 6455
//! handshake, and with the post-upgrade task driving a server-role
//! [`Connection`] through its own handshake rather than handing a raw
//! socket to application code.

use crate::close_code;
use crate::connection::{server, Connection, ConnectionEvent, ConnectionHandle, ConnectionOptions};
use crate::error::{AcceptorError, AcceptorErrorCode};
use http::header::{self, HeaderValue};
use http::{Request, Response, StatusCode};
use hyper::upgrade::OnUpgrade;
use hyper::Body;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol;
use tokio_tungstenite::WebSocketStream;
use tower::Service;
use tracing::{debug, warn};

/// The CWDTP sub-protocol the upgrade request must advertise.
pub const SUB_PROTOCOL: &str = crate::connection::client::SUB_PROTOCOL;

/// A `verifyClient`-style application gate: given the upgrade request,
/// decide whether to accept it. On rejection, carries the status code to
/// respond with and the error to surface via
/// [`AcceptorEvent::VerifyClientError`].
pub type VerifyClientFn = Arc<
    dyn Fn(Request<Body>) -> Pin<Box<dyn Future<Output = Result<Request<Body>, VerifyRejection>> + Send>>
        + Send
        + Sync,
>;

#[derive(Debug)]
pub struct VerifyRejection {
    pub status: StatusCode,
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

fn default_verify_client() -> VerifyClientFn {
    Arc::new(|req| Box::pin(async move { Ok(req) }))
}

fn default_get_client_ip() -> Arc<dyn Fn(&Request<Body>) -> String + Send + Sync> {
    Arc::new(|req| {
        req.headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    })
}

fn default_handle_cors() -> Arc<dyn Fn(Option<&str>) -> bool + Send + Sync> {
    Arc::new(|_origin| true)
}

/// Acceptor configuration (spec §6 "Acceptor surface").
#[derive(Clone)]
pub struct AcceptorConfig {
    pub path: String,
    pub heart_beat_interval: Duration,
    pub get_client_ip: Arc<dyn Fn(&Request<Body>) -> String + Send + Sync>,
    pub handle_cors: Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>,
    pub verify_client: VerifyClientFn,
    pub connection_options: ConnectionOptions,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        AcceptorConfig {
            path: "*".to_string(),
            heart_beat_interval: Duration::from_secs(20),
            get_client_ip: default_get_client_ip(),
            handle_cors: default_handle_cors(),
            verify_client: default_verify_client(),
            connection_options: ConnectionOptions::default(),
        }
    }
}

/// Events emitted by the acceptor (spec §4.E).
#[derive(Debug)]
pub enum AcceptorEvent {
    /// A connection completed its CWDTP handshake and is now `Open`.
    Connection(Connection, Request<Body>),
    RejectedHandshake { client_ip: String, code: String },
    VerifyClientError(Box<dyn std::error::Error + Send + Sync>),
    HandshakeTimeout { client_ip: String },
    ConnectionError(AcceptorError),
    ConnectionTimeout(ConnectionHandle),
}

impl std::fmt::Display for AcceptorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

struct AcceptorInner {
    config: AcceptorConfig,
    fleet: RwLock<HashMap<String, ConnectionHandle>>,
    events_tx: mpsc::UnboundedSender<AcceptorEvent>,
    heartbeat: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// The CWDTP acceptor. Cloneable (cheap `Arc` clone) so it can be mounted
/// directly as a `tower`/`hyper` `Service` while the application retains a
/// handle to read [`AcceptorEvent`]s and call `detach`/`disconnect_all`.
#[derive(Clone)]
pub struct Acceptor {
    inner: Arc<AcceptorInner>,
}

impl Acceptor {
    /// Constructs a new acceptor and starts its fleet heartbeat sweep.
    /// Returns the acceptor (double as the `hyper`/`tower` `Service` to
    /// mount on an HTTP server) and the receiver of its events.
    pub fn new(config: AcceptorConfig) -> (Self, mpsc::UnboundedReceiver<AcceptorEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(AcceptorInner {
            config,
            fleet: RwLock::new(HashMap::new()),
            events_tx,
            heartbeat: std::sync::Mutex::new(None),
        });
        let acceptor = Acceptor { inner };
        acceptor.attach();
        (acceptor, events_rx)
    }

    /// Starts (or restarts) the fleet heartbeat sweep. Called automatically
    /// by [`Acceptor::new`]; public so an application that previously
    /// called [`Acceptor::detach`] can resume accepting traffic.
    pub fn attach(&self) {
        let inner = self.inner.clone();
        let interval = inner.config.heart_beat_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                sweep_fleet(&inner).await;
            }
        });
        *self.inner.heartbeat.lock().unwrap() = Some(handle);
    }

    /// Disconnects every fleet member with close code 1001 and reason
    /// "Closing server", then stops the heartbeat sweep.
    pub async fn detach(&self) {
        self.disconnect_all("Closing server").await;
        if let Some(handle) = self.inner.heartbeat.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Disconnects every fleet member with close code 1001.
    pub async fn disconnect_all(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let fleet = self.inner.fleet.read().await;
        for conn in fleet.values() {
            conn.disconnect(close_code::GOING_AWAY, reason.clone());
        }
    }

    pub async fn fleet_size(&self) -> usize {
        self.inner.fleet.read().await.len()
    }
}

async fn sweep_fleet(inner: &Arc<AcceptorInner>) {
    let snapshot: Vec<(String, ConnectionHandle)> = {
        let fleet = inner.fleet.read().await;
        fleet
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect()
    };

    for (id, handle) in snapshot {
        if handle.state().is_terminal() {
            inner.fleet.write().await.remove(&id);
            continue;
        }
        if !handle.is_alive() {
            handle.kill_for_missed_heartbeat();
            inner.fleet.write().await.remove(&id);
            let _ = inner
                .events_tx
                .send(AcceptorEvent::ConnectionTimeout(handle));
        } else {
            handle.send_heartbeat_ping();
        }
    }
}

impl Service<Request<Body>> for Acceptor {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(handle_upgrade(inner, req).await) })
    }
}

fn reject(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONNECTION, "close")
        .body(Body::empty())
        .expect("building a rejection response never fails")
}

async fn handle_upgrade(inner: Arc<AcceptorInner>, req: Request<Body>) -> Response<Body> {
    let client_ip = (inner.config.get_client_ip)(&req);

    // Gate 1: path.
    if inner.config.path != "*" && req.uri().path() != inner.config.path {
        emit_rejected(&inner, &client_ip, "NOT_FOUND");
        return reject(StatusCode::NOT_FOUND);
    }

    // Gate 2: sub-protocol.
    if !advertises_sub_protocol(&req) {
        emit_rejected(&inner, &client_ip, AcceptorErrorCode::InvalidProto.as_str());
        return reject(StatusCode::BAD_REQUEST);
    }

    // Gate 3: CORS.
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    if !(inner.config.handle_cors)(origin) {
        emit_rejected(&inner, &client_ip, AcceptorErrorCode::CorsFailed.as_str());
        return reject(StatusCode::FORBIDDEN);
    }

    // Gate 4: application-level verification.
    let req = match (inner.config.verify_client)(req).await {
        Ok(req) => req,
        Err(rejection) => {
            let _ = inner
                .events_tx
                .send(AcceptorEvent::VerifyClientError(rejection.error));
            emit_rejected(&inner, &client_ip, AcceptorErrorCode::VerifyFailed.as_str());
            return reject(rejection.status);
        }
    };

    // Gate 5: RFC 6455 upgrade.
    let (parts, body) = req.into_parts();
    let mut req = Request::from_parts(parts, body);
    let accept_key = match websocket_accept_key(&req) {
        Some(key) => key,
        None => {
            emit_rejected(&inner, &client_ip, AcceptorErrorCode::WsHandshakeFailed.as_str());
            return reject(StatusCode::BAD_REQUEST);
        }
    };
    let on_upgrade = match req.extensions_mut().remove::<OnUpgrade>() {
        Some(on_upgrade) => on_upgrade,
        None => {
            emit_rejected(&inner, &client_ip, AcceptorErrorCode::WsHandshakeFailed.as_str());
            return reject(StatusCode::BAD_REQUEST);
        }
    };

    let response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_ACCEPT, accept_key)
        .header(header::SEC_WEBSOCKET_PROTOCOL, SUB_PROTOCOL)
        .body(Body::empty())
        .expect("building the 101 response never fails");

    // Gate 6: the CWDTP handshake itself, driven after the raw upgrade
    // completes.
    tokio::spawn(drive_cwdtp_handshake(inner, client_ip, req, on_upgrade));

    response
}

async fn drive_cwdtp_handshake(
    inner: Arc<AcceptorInner>,
    client_ip: String,
    req: Request<Body>,
    on_upgrade: OnUpgrade,
) {
    let upgraded = match on_upgrade.await {
        Ok(upgraded) => upgraded,
        Err(err) => {
            let _ = inner.events_tx.send(AcceptorEvent::ConnectionError(
                AcceptorError::WsHandshake(tokio_tungstenite::tungstenite::Error::Io(
                    std::io::Error::new(std::io::ErrorKind::Other, err),
                )),
            ));
            return;
        }
    };

    let ws = WebSocketStream::from_raw_socket(upgraded, protocol::Role::Server, None).await;
    let mut conn = server::from_upgraded(ws, inner.config.connection_options);

    match conn.recv_event().await {
        Some(ConnectionEvent::Open) => {
            let id = conn.id().expect("id is set before Open is emitted");
            debug!(id = %id, client_ip, "connection joined fleet");
            inner.fleet.write().await.insert(id, conn.handle());
            let _ = inner.events_tx.send(AcceptorEvent::Connection(conn, req));
        }
        Some(ConnectionEvent::HandshakeTimeout) => {
            warn!(client_ip, "handshake timed out");
            let _ = inner
                .events_tx
                .send(AcceptorEvent::HandshakeTimeout { client_ip });
        }
        Some(ConnectionEvent::Error(err)) => {
            warn!(client_ip, ?err, "handshake errored, terminating");
            let _ = inner
                .events_tx
                .send(AcceptorEvent::ConnectionError(AcceptorError::Connection(err)));
            let _ = conn.terminate(close_code::PROTOCOL_ERROR, "CWDTP handshake error").await;
        }
        _ => {}
    }
}

fn emit_rejected(inner: &Arc<AcceptorInner>, client_ip: &str, code: &str) {
    debug!(client_ip, code, "rejected upgrade");
    let _ = inner.events_tx.send(AcceptorEvent::RejectedHandshake {
        client_ip: client_ip.to_string(),
        code: code.to_string(),
    });
}

fn advertises_sub_protocol(req: &Request<Body>) -> bool {
    req.headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(|value| value.split(',').any(|p| p.trim() == SUB_PROTOCOL))
        .unwrap_or(false)
}

fn header_eq(req: &Request<Body>, key: header::HeaderName, value: &str) -> bool {
    req.headers()
        .get(&key)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case(value))
        .unwrap_or(false)
}

/// Validates the RFC 6455 handshake headers and computes
/// `Sec-WebSocket-Accept`, grounded on the teacher's own `sign()` in
/// `examples/tokio-rs-axum/src/ws/future.rs`.
fn websocket_accept_key(req: &Request<Body>) -> Option<HeaderValue> {
    if !header_eq(req, header::CONNECTION, "upgrade") {
        return None;
    }
    if !header_eq(req, header::UPGRADE, "websocket") {
        return None;
    }
    if !header_eq(req, header::SEC_WEBSOCKET_VERSION, "13") {
        return None;
    }
    let key = req.headers().get(header::SEC_WEBSOCKET_KEY)?.to_str().ok()?;

    let mut preimage = String::with_capacity(key.len() + 36);
    preimage.push_str(key);
    preimage.push_str("258EAFA5-E914-47DA-95CA-C5AB0DC85B11");
    let encoded = base64::encode(crate::crypto::sha1(preimage.as_bytes()));
    HeaderValue::from_str(&encoded).ok()
}
