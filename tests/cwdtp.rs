//! Integration tests driving a real loopback `Acceptor` against the
//! `Connection` client API, matching the teacher's own
//! `run_in_background` + ephemeral-port style in `src/tests.rs`, with
//! `tokio-tungstenite::connect_async` standing in for `reqwest` (this
//! crate speaks WebSocket upgrades, not plain HTTP).

use cwdtp_engine::acceptor::{Acceptor, AcceptorConfig, AcceptorEvent};
use cwdtp_engine::codec::{Arg, BinaryTag, Decoded, TypedArray};
use cwdtp_engine::connection::{client, ConnectionOptions};
use cwdtp_engine::error::ConnectionError;
use futures_util::{SinkExt, StreamExt};
use hyper::service::make_service_fn;
use hyper::Server;
use serde_json::json;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

async fn run_acceptor_in_background(config: AcceptorConfig) -> (SocketAddr, tokio::sync::mpsc::UnboundedReceiver<AcceptorEvent>) {
    let (acceptor, events) = Acceptor::new(config);

    let listener = TcpListener::bind("127.0.0.1:0").expect("could not bind ephemeral socket");
    let addr = listener.local_addr().unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let make_service = make_service_fn(move |_conn| {
            let acceptor = acceptor.clone();
            async move { Ok::<_, std::convert::Infallible>(acceptor) }
        });
        let server = Server::from_tcp(listener).unwrap().serve(make_service);
        tx.send(()).unwrap();
        server.await.expect("server error");
    });
    rx.await.unwrap();

    (addr, events)
}

#[tokio::test]
async fn happy_path_handshake_and_echo() {
    let (addr, mut events) = run_acceptor_in_background(AcceptorConfig::default()).await;

    let mut client = client::connect(&format!("ws://{}", addr), ConnectionOptions::default())
        .await
        .expect("client should connect");

    let mut server_conn = loop {
        match events.recv().await.expect("acceptor should emit an event") {
            AcceptorEvent::Connection(conn, _req) => break conn,
            other => panic!("unexpected acceptor event before connection: {:?}", other),
        }
    };

    assert_eq!(client.recv_event().await, Some(cwdtp_engine::connection::ConnectionEvent::Open));
    assert!(client.id().is_some());
    assert_eq!(client.id(), server_conn.id());

    client
        .send("greeting", vec![Arg::from("hello")])
        .await
        .expect("send should succeed once open");

    let message = server_conn
        .recv_message()
        .await
        .expect("server should receive the greeting");
    assert_eq!(message.event, "greeting");
    assert_eq!(message.data.len(), 1);
    match &message.data[0] {
        Decoded::String(s) => assert_eq!(s, "hello"),
        other => panic!("expected a string arg, got {:?}", other),
    }
}

#[tokio::test]
async fn typed_binary_round_trips_over_the_wire() {
    let (addr, mut events) = run_acceptor_in_background(AcceptorConfig::default()).await;

    let mut client = client::connect(&format!("ws://{}", addr), ConnectionOptions::default())
        .await
        .expect("client should connect");
    assert_eq!(client.recv_event().await, Some(cwdtp_engine::connection::ConnectionEvent::Open));

    let mut server_conn = match events.recv().await.unwrap() {
        AcceptorEvent::Connection(conn, _req) => conn,
        other => panic!("unexpected event: {:?}", other),
    };

    let samples: Vec<i32> = vec![1, -2, 3, i32::MAX, i32::MIN];
    let array = TypedArray::from(samples.clone());
    assert_eq!(array.tag, BinaryTag::Int32Array);

    client
        .send("samples", vec![Arg::from(array)])
        .await
        .unwrap();

    let message = server_conn.recv_message().await.unwrap();
    assert_eq!(message.event, "samples");
    match &message.data[0] {
        Decoded::Binary(arr) => assert_eq!(arr.as_i32_vec(), samples),
        other => panic!("expected binary data, got {:?}", other),
    }
}

#[tokio::test]
async fn rejects_non_cwdtp_sub_protocol() {
    let (addr, _events) = run_acceptor_in_background(AcceptorConfig::default()).await;

    let request = format!("ws://{}", addr);
    let err = tokio_tungstenite::connect_async(request.as_str())
        .await
        .expect_err("upgrade without the pow.cwdtp sub-protocol should be rejected");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
        }
        other => panic!("expected an HTTP-level rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn server_handshake_timeout_fires() {
    let config = AcceptorConfig {
        connection_options: ConnectionOptions::new().handshake_timeout(Duration::from_millis(50)),
        ..AcceptorConfig::default()
    };
    let (addr, mut events) = run_acceptor_in_background(config).await;

    let mut request = format!("ws://{}", addr)
        .into_client_request()
        .expect("valid request");
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        http::HeaderValue::from_static("pow.cwdtp"),
    );
    // Connect the raw WebSocket but never speak CWDTP on top of it.
    let (_ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .expect("raw websocket upgrade should succeed");

    match tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("acceptor should report the timeout before the test timeout")
        .expect("channel should not close")
    {
        AcceptorEvent::HandshakeTimeout { .. } => {}
        other => panic!("expected a handshake timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn disconnect_runs_the_closing_handshake_on_both_sides() {
    let (addr, mut events) = run_acceptor_in_background(AcceptorConfig::default()).await;

    let mut client = client::connect(&format!("ws://{}", addr), ConnectionOptions::default())
        .await
        .unwrap();
    assert_eq!(client.recv_event().await, Some(cwdtp_engine::connection::ConnectionEvent::Open));

    let mut server_conn = match events.recv().await.unwrap() {
        AcceptorEvent::Connection(conn, _req) => conn,
        other => panic!("unexpected event: {:?}", other),
    };

    client.disconnect(1000, "done").await.unwrap();

    match server_conn.recv_event().await {
        Some(cwdtp_engine::connection::ConnectionEvent::Closing { reason }) => {
            assert_eq!(reason, "done");
        }
        other => panic!("expected Closing, got {:?}", other),
    }
    match server_conn.recv_event().await {
        Some(cwdtp_engine::connection::ConnectionEvent::Close { was_error, .. }) => {
            assert!(!was_error);
        }
        other => panic!("expected Close, got {:?}", other),
    }

    match client.recv_event().await {
        Some(cwdtp_engine::connection::ConnectionEvent::Closing { reason }) => {
            assert_eq!(reason, "done");
        }
        other => panic!("expected Closing on the initiating side, got {:?}", other),
    }
    match client.recv_event().await {
        Some(cwdtp_engine::connection::ConnectionEvent::Close { was_error, .. }) => {
            assert!(!was_error);
        }
        other => panic!("expected Close on the initiating side, got {:?}", other),
    }
}

#[tokio::test]
async fn send_fails_once_not_open() {
    let (addr, mut events) = run_acceptor_in_background(AcceptorConfig::default()).await;

    let mut client = client::connect(&format!("ws://{}", addr), ConnectionOptions::default())
        .await
        .unwrap();
    assert_eq!(client.recv_event().await, Some(cwdtp_engine::connection::ConnectionEvent::Open));
    let _server_conn = match events.recv().await.unwrap() {
        AcceptorEvent::Connection(conn, _req) => conn,
        other => panic!("unexpected event: {:?}", other),
    };

    client.terminate(1000, "bye").await.unwrap();

    let err = client
        .send("late", vec![])
        .await
        .expect_err("sending after termination should fail");
    assert!(matches!(err, ConnectionError::NotConnected));
}

/// Spec §8 scenario S5: a server connection that never replies `cwdtp::pong`
/// is terminated with close code 4004 and reported via
/// `AcceptorEvent::ConnectionTimeout` once the fleet sweep catches it missing
/// a heartbeat. Drives a raw `tokio-tungstenite` socket through the CWDTP
/// opening handshake by hand (rather than `connection::client`, which always
/// answers `cwdtp::ping`) so the peer can be made to go silent on purpose.
#[tokio::test]
async fn heartbeat_kill_fires_connection_timeout() {
    let config = AcceptorConfig {
        heart_beat_interval: Duration::from_millis(150),
        ..AcceptorConfig::default()
    };
    let (addr, mut events) = run_acceptor_in_background(config).await;

    let mut request = format!("ws://{}", addr)
        .into_client_request()
        .expect("valid request");
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        http::HeaderValue::from_static("pow.cwdtp"),
    );
    let (mut ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .expect("raw websocket upgrade should succeed");

    ws.send(Message::Text(
        json!({"event": "cwdtp::client-hello", "meta": {"req_key": "dGVzdC1yZXEta2V5"}, "data": []})
            .to_string(),
    ))
    .await
    .expect("client-hello should send");

    let hello = ws
        .next()
        .await
        .expect("socket should not close before server-hello")
        .expect("server-hello should be a valid frame");
    match hello {
        Message::Text(_) => {}
        other => panic!("expected a text server-hello, got {:?}", other),
    }

    ws.send(Message::Text(
        json!({"event": "cwdtp::server-hello-ack", "meta": {}, "data": []}).to_string(),
    ))
    .await
    .expect("server-hello-ack should send");

    let mut server_conn = match events.recv().await.unwrap() {
        AcceptorEvent::Connection(conn, _req) => conn,
        other => panic!("unexpected event: {:?}", other),
    };
    assert_eq!(
        server_conn.recv_event().await,
        Some(cwdtp_engine::connection::ConnectionEvent::Open)
    );

    // Never answer the server's `cwdtp::ping`s; just keep reading frames so
    // the underlying TCP connection stays open until the server kills it.
    let silent_peer = tokio::spawn(async move { while ws.next().await.is_some() {} });

    match tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("acceptor should report the heartbeat kill before the test timeout")
        .expect("channel should not close")
    {
        AcceptorEvent::ConnectionTimeout(handle) => {
            assert_eq!(handle.id(), server_conn.id());
        }
        other => panic!("expected a connection timeout, got {:?}", other),
    }

    silent_peer.abort();
}
