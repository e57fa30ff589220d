//! CWDTP: a symmetric, message-oriented, event-driven transport layered on
//! WebSockets.
//!
//! A CWDTP peer opens an ordinary WebSocket advertising the `pow.cwdtp`
//! sub-protocol, then runs its own opening handshake on top (an
//! RFC-6455-style key/accept exchange carried as JSON envelopes) before
//! either side may exchange application events. See [`connection`] for the
//! per-connection state machine and [`acceptor`] for the server-side upgrade
//! screening and fleet management.
//!
//! ```no_run
//! use cwdtp_engine::connection::{client, ConnectionOptions};
//! use cwdtp_engine::codec::Arg;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut conn = client::connect("ws://localhost:8080", ConnectionOptions::default()).await?;
//! conn.send("greeting", vec![Arg::from("hello")]).await?;
//! # Ok(())
//! # }
//! ```

pub mod acceptor;
pub mod close_code;
pub mod codec;
pub mod connection;
pub mod crypto;
pub mod envelope;
pub mod error;

pub use acceptor::{Acceptor, AcceptorConfig, AcceptorEvent};
pub use connection::{Connection, ConnectionHandle, ConnectionOptions};
pub use error::{AcceptorError, ConnectionError};
