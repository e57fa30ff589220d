//! Lifecycle and message events delivered to the application.
//!
//! Per the design notes (spec §9), this crate models the source's
//! event-emitter idiom as one outbound channel of tagged events per
//! connection, with the message-router kept as a second, separate channel
//! from the lifecycle emitter (spec §3's "message-router" field).

use crate::codec::Decoded;
use crate::error::ConnectionError;

/// Lifecycle notifications. Ordering guarantee (spec §5): `Open` precedes
/// any `Closing`/`Close`; at most one `Open`; exactly one of
/// `{Close, HandshakeTimeout, PingTimeout, CloseTimeout}` is the last event.
/// `Error` may precede any of these.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Open,
    Closing { reason: String },
    Close { was_error: bool, reason: String },
    Error(ConnectionErrorEvent),
    HandshakeTimeout,
    PingTimeout,
    CloseTimeout,
}

/// A lifecycle-level error. Carries the same [`ConnectionError`] kinds used
/// by synchronous operation failures, plus `ConnectionReset` for an
/// unsolicited close during `Opening`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionErrorEvent {
    ConnectionReset,
    Handshake(crate::error::HandshakeErrorCode),
    InvalidMsg(crate::error::InvalidMsgErrorCode),
}

impl From<ConnectionErrorEvent> for ConnectionError {
    fn from(event: ConnectionErrorEvent) -> Self {
        match event {
            ConnectionErrorEvent::ConnectionReset => ConnectionError::ConnectionReset,
            ConnectionErrorEvent::Handshake(code) => ConnectionError::Handshake(code),
            ConnectionErrorEvent::InvalidMsg(code) => ConnectionError::InvalidMsg(code),
        }
    }
}

/// One non-reserved peer event delivered on the message-router.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub event: String,
    pub data: Vec<Decoded>,
}
