//! The error taxonomy surfaced across the CWDTP API boundary.
//!
//! Mirrors the category/kind split in the specification: transport errors,
//! handshake errors, inbound-framing errors, event-naming errors, and the
//! acceptor's upgrade-screening errors.

use thiserror::Error;

/// Reasons a handshake envelope is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandshakeErrorCode {
    /// The `cwdtp::server-hello`/`cwdtp::client-hello` envelope itself was
    /// malformed (missing or wrong-typed fields).
    InvalidCwdtpMsg,
    /// `meta.res_key` did not match the expected derivation.
    InvalidResKey,
    /// `meta.cid` was missing.
    MissingConnId,
}

impl HandshakeErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            HandshakeErrorCode::InvalidCwdtpMsg => "INVALID_CWDTP_MSG",
            HandshakeErrorCode::InvalidResKey => "INVALID_RES_KEY",
            HandshakeErrorCode::MissingConnId => "MISSING_CONN_ID",
        }
    }
}

/// Reasons an inbound envelope is rejected after the handshake completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidMsgErrorCode {
    /// A binary WebSocket frame arrived; CWDTP envelopes are text-only.
    UnexpectedBinary,
    /// The frame was not valid CWDTP JSON (parse failure, missing
    /// `event`/`meta`/`data`, or a `type`-less/unknown typed-binary value).
    InvalidCwdtp,
}

impl InvalidMsgErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidMsgErrorCode::UnexpectedBinary => "UNEXPECTED_BINARY",
            InvalidMsgErrorCode::InvalidCwdtp => "INVALID_CWDTP",
        }
    }
}

/// Reasons `send`/`on` reject an event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidEventNameCode {
    EmptyEventName,
    ReservedEvent,
}

impl InvalidEventNameCode {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidEventNameCode::EmptyEventName => "EMPTY_EVENT_NAME",
            InvalidEventNameCode::ReservedEvent => "RESERVED_EVENT",
        }
    }
}

/// Reasons the acceptor rejects an HTTP upgrade before a `Connection` ever
/// exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AcceptorErrorCode {
    InvalidProto,
    CorsFailed,
    VerifyFailed,
    WsHandshakeFailed,
}

impl AcceptorErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AcceptorErrorCode::InvalidProto => "INVALID_PROTO",
            AcceptorErrorCode::CorsFailed => "CORS_FAILED",
            AcceptorErrorCode::VerifyFailed => "VERIFY_FAILED",
            AcceptorErrorCode::WsHandshakeFailed => "WS_HANDSHAKE_FAILED",
        }
    }
}

/// Errors surfaced by a [`Connection`](crate::connection::Connection).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// `send`/`disconnect`/`terminate` attempted while the connection was
    /// not in the state that operation requires.
    #[error("connection is not open")]
    NotConnected,

    /// The underlying WebSocket closed before the CWDTP handshake
    /// completed.
    #[error("connection reset before handshake completed")]
    ConnectionReset,

    /// A handshake envelope failed validation.
    #[error("handshake failed: {code}", code = .0.as_str())]
    Handshake(HandshakeErrorCode),

    /// An inbound envelope violated framing rules.
    #[error("invalid message: {code}", code = .0.as_str())]
    InvalidMsg(InvalidMsgErrorCode),

    /// `send`/`on` was called with an empty or reserved event name.
    #[error("invalid event name: {code}", code = .0.as_str())]
    InvalidEventName(InvalidEventNameCode),
}

/// Errors surfaced by an [`Acceptor`](crate::acceptor::Acceptor) during
/// upgrade screening. These never propagate out of the upgrade handler;
/// they are reported via the `rejectedHandshake`/`verifyClientError`/
/// `connectionError` callbacks (see [`crate::acceptor::AcceptorEvent`]).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AcceptorError {
    #[error("upgrade screening failed: {code}", code = .0.as_str())]
    Rejected(AcceptorErrorCode),

    #[error("verifyClient callback failed: {0}")]
    VerifyClient(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("websocket handshake failed: {0}")]
    WsHandshake(#[source] tokio_tungstenite::tungstenite::Error),

    /// The raw WebSocket upgrade succeeded but the CWDTP handshake layered
    /// on top of it failed (bad `res_key`, missing `cid`, malformed
    /// envelope, or the socket resetting mid-handshake).
    #[error("CWDTP handshake failed: {0:?}")]
    Connection(crate::connection::ConnectionErrorEvent),
}
