//! Example echo server.
//!
//! Run with
//!
//! ```
//! cargo run --example echo-server
//! ```
//!
//! Accepts CWDTP connections on `/` and echoes every non-reserved event
//! straight back to the sender.

use std::net::SocketAddr;

use cwdtp_engine::acceptor::{Acceptor, AcceptorConfig, AcceptorEvent};
use cwdtp_engine::codec::Arg;
use hyper::service::make_service_fn;
use hyper::Server;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let (acceptor, mut events) = Acceptor::new(AcceptorConfig::default());

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                AcceptorEvent::Connection(mut conn, _req) => {
                    tokio::spawn(async move {
                        while let Some(message) = conn.recv_message().await {
                            let args = message
                                .data
                                .into_iter()
                                .map(|decoded| Arg::json(decoded.into_json()))
                                .collect();
                            if conn.send(message.event, args).await.is_err() {
                                break;
                            }
                        }
                    });
                }
                other => tracing::debug!(?other, "acceptor event"),
            }
        }
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let make_service = make_service_fn(move |_conn| {
        let acceptor = acceptor.clone();
        async move { Ok::<_, std::convert::Infallible>(acceptor) }
    });

    Server::bind(&addr).serve(make_service).await.unwrap();
}
