//! Close codes this layer uses (§6 of the specification).

/// Normal closure; used by the client when it self-closes after a ping
/// timeout.
pub const NORMAL: u16 = 1000;
/// Going away; used by the acceptor on shutdown and on closing-handshake
/// completion.
pub const GOING_AWAY: u16 = 1001;
/// Protocol error; used when a CWDTP error is surfaced on the peer socket.
pub const PROTOCOL_ERROR: u16 = 1002;
/// CWDTP handshake timed out.
pub const HANDSHAKE_TIMEOUT: u16 = 4002;
/// Heartbeat pong timeout (server-initiated kill).
pub const PONG_TIMEOUT: u16 = 4004;
