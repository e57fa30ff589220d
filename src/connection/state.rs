//! The connection state enum (spec §3).

/// Lifecycle state of a single [`super::Connection`]. Initial state is
/// always `Opening`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Opening,
    Open,
    Closing,
    Closed,
    Error,
    TimedOut,
}

impl ConnectionState {
    /// True for the three terminal states in which every timer must be
    /// cleared and the underlying WebSocket must be closed or closing.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Closed | ConnectionState::Error | ConnectionState::TimedOut
        )
    }
}

/// Client vs. server role. Only affects which side speaks first in the
/// opening handshake and which side drives the heartbeat (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}
