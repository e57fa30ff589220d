//! Per-connection configurable timeouts (spec §3).

use std::time::Duration;

/// Builder-style configuration, matching the teacher's
/// `WebSocketUpgrade::max_send_queue`/`max_message_size`/`max_frame_size`
/// method-chaining shape.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    pub(crate) handshake_timeout: Duration,
    pub(crate) ping_timeout: Duration,
    pub(crate) close_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            handshake_timeout: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}
