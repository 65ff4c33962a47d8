//! End-to-end connection scenarios driven over in-memory sockets.

use std::io;
use std::time::Duration;

use bytes::Bytes;

use corvus_rpc::protocol::native;
use corvus_rpc::{
    CallError, ConnError, ConnState, Connection, ConnectionHandle, ConnectionInfo, InboundCall,
    OutboundCall, Protocol, RpcController, RpcMetrics, UserCredentials,
};
use corvus_testkit::{init_tracing, test_addr, MemSocket, RecordingDispatcher, TestConnection};

fn creds() -> UserCredentials {
    UserCredentials::new("tester")
}

fn flatten(slices: Vec<Bytes>) -> Vec<u8> {
    let mut out = Vec::new();
    for s in &slices {
        out.extend_from_slice(s);
    }
    out
}

fn request_wire(call_id: i32, payload: &'static [u8]) -> Vec<u8> {
    flatten(native::encode_request(call_id, Bytes::from_static(payload)).unwrap())
}

fn response_wire(call_id: i32, payload: &'static [u8]) -> Vec<u8> {
    flatten(native::encode_response(call_id, false, Bytes::from_static(payload)).unwrap())
}

/// Poll the dump until a predicate holds; the driver runs between
/// polls.
async fn wait_for(
    handle: &ConnectionHandle,
    what: &str,
    pred: impl Fn(&ConnectionInfo) -> bool,
) -> ConnectionInfo {
    for _ in 0..1000 {
        if let Some(info) = handle.dump().await {
            if pred(&info) {
                return info;
            }
        }
        tokio::task::yield_now().await;
    }
    panic!("timed out waiting for {what}");
}

fn expect_redis(call: InboundCall) -> corvus_rpc::RedisInboundCall {
    match call {
        InboundCall::Redis(call) => call,
        other => panic!("expected a redis call, got {other:?}"),
    }
}

fn expect_native(call: InboundCall) -> corvus_rpc::NativeInboundCall {
    match call {
        InboundCall::Native(call) => call,
        other => panic!("expected a native call, got {other:?}"),
    }
}

#[tokio::test]
async fn client_request_response() {
    init_tracing();
    let (socket, peer) = MemSocket::pair();
    let conn = Connection::client(socket, test_addr());
    let tc = TestConnection::start(conn);
    tc.handle.complete_negotiation(Ok(creds()));

    let (call, completion) =
        OutboundCall::new("Ping", Bytes::from_static(b"hello"), RpcController::new());
    tc.handle.queue_outbound_call(call);

    // Length prefix 0x0000000A: five header bytes plus five of payload.
    let wire = peer.read_exact(14).await.unwrap();
    assert_eq!(&wire[..4], &[0x00, 0x00, 0x00, 0x0A]);
    let frame = native::parse_frame(Bytes::from(wire)).unwrap();
    assert_eq!(frame.call_id, 1);
    assert!(!frame.is_response);
    assert_eq!(frame.payload, Bytes::from_static(b"hello"));

    peer.write_all(&response_wire(1, b"world")).await.unwrap();

    let outcome = completion.await.unwrap().unwrap();
    assert_eq!(outcome.call_id, 1);
    assert!(!outcome.is_error);
    assert_eq!(outcome.payload, Bytes::from_static(b"world"));

    let info = wait_for(&tc.handle, "idle connection", |i| i.idle).await;
    assert_eq!(info.state, ConnState::Open);
    assert_eq!(info.credentials, Some(creds()));
    assert!(info.calls_in_flight.is_empty());

    tc.stop().await;
}

#[tokio::test(start_paused = true)]
async fn client_timeout_then_late_response_is_dropped_silently() {
    init_tracing();
    let (socket, peer) = MemSocket::pair();
    let conn = Connection::client(socket, test_addr());
    let tc = TestConnection::start(conn);
    tc.handle.complete_negotiation(Ok(creds()));

    let (call, completion) = OutboundCall::new(
        "Get",
        Bytes::from_static(b"key"),
        RpcController::with_timeout(Duration::from_millis(50)),
    );
    tc.handle.queue_outbound_call(call);

    // The request drains; no response is sent.
    let wire = peer.read_exact(12).await.unwrap();
    let frame = native::parse_frame(Bytes::from(wire)).unwrap();
    assert_eq!(frame.call_id, 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(completion.await.unwrap(), Err(CallError::TimedOut));

    // The timed-out entry stays behind: no call in flight to show,
    // but the connection is deliberately not idle.
    let info = tc.handle.dump().await.expect("connection alive");
    assert!(info.calls_in_flight.is_empty());
    assert!(!info.idle);

    // The response shows up at t=120ms; it must be swallowed without
    // tearing anything down, and the stale entry reclaimed.
    tokio::time::sleep(Duration::from_millis(60)).await;
    peer.write_all(&response_wire(1, b"late")).await.unwrap();
    wait_for(&tc.handle, "stale entry reclaimed", |i| i.idle).await;

    // The connection keeps working afterwards.
    let (call, completion) = OutboundCall::new("Get", Bytes::from_static(b"k2"), RpcController::new());
    tc.handle.queue_outbound_call(call);
    let wire = peer.read_exact(11).await.unwrap();
    let frame = native::parse_frame(Bytes::from(wire)).unwrap();
    assert_eq!(frame.call_id, 2);
    peer.write_all(&response_wire(2, b"v")).await.unwrap();
    assert!(completion.await.unwrap().is_ok());

    tc.stop().await;
}

#[tokio::test]
async fn duplicate_server_call_id_destroys_the_connection() {
    init_tracing();
    let (socket, peer) = MemSocket::pair();
    let (dispatcher, mut calls) = RecordingDispatcher::new();
    let conn = Connection::server(socket, test_addr(), Protocol::Native, dispatcher);
    let tc = TestConnection::start(conn);
    tc.handle.complete_negotiation(Ok(creds()));

    let frame = request_wire(7, b"query");
    peer.write_all(&frame).await.unwrap();

    let first = expect_native(calls.recv().await.expect("first call"));
    assert_eq!(first.call_id(), 7);

    // The same id again: the peer is misbehaving.
    peer.write_all(&frame).await.unwrap();

    peer.expect_eof().await.unwrap();
    assert!(calls.recv().await.is_none(), "second call must not dispatch");
    tc.join().await;
}

#[tokio::test(start_paused = true)]
async fn redis_pipelining_is_single_in_flight() {
    init_tracing();
    let (socket, peer) = MemSocket::pair();
    let (dispatcher, mut calls) = RecordingDispatcher::new();
    let conn = Connection::server(socket, test_addr(), Protocol::Redis, dispatcher);
    let tc = TestConnection::start(conn);
    tc.handle.complete_negotiation(Ok(creds()));

    // Two complete inline commands plus three leftover bytes of a
    // third, all in one write.
    peer.write_all(b"PING\r\nGET k\r\nGET").await.unwrap();

    let first = expect_redis(calls.recv().await.expect("first command"));
    assert_eq!(first.args(), [Bytes::from_static(b"PING")]);

    // The second command is already buffered but must wait for the
    // first response.
    assert!(
        tokio::time::timeout(Duration::from_millis(50), calls.recv())
            .await
            .is_err(),
        "second command dispatched while the first was in flight"
    );

    first.respond(Bytes::from_static(b"+PONG\r\n"));
    assert_eq!(peer.read_exact(7).await.unwrap(), b"+PONG\r\n");

    // Dispatched from the pre-read excess, with no further socket read.
    let second = expect_redis(calls.recv().await.expect("second command"));
    assert_eq!(
        second.args(),
        [Bytes::from_static(b"GET"), Bytes::from_static(b"k")]
    );
    second.respond(Bytes::from_static(b"$1\r\nv\r\n"));
    assert_eq!(peer.read_exact(7).await.unwrap(), b"$1\r\nv\r\n");

    // Completing the third command's bytes dispatches it.
    peer.write_all(b" key2\r\n").await.unwrap();
    let third = expect_redis(calls.recv().await.expect("third command"));
    assert_eq!(
        third.args(),
        [Bytes::from_static(b"GET"), Bytes::from_static(b"key2")]
    );
    third.respond(Bytes::from_static(b"$2\r\nv2\r\n"));
    assert_eq!(peer.read_exact(8).await.unwrap(), b"$2\r\nv2\r\n");

    tc.stop().await;
}

#[tokio::test]
async fn shutdown_fails_pending_client_calls() {
    init_tracing();
    let (socket, peer) = MemSocket::pair();
    let conn = Connection::client(socket, test_addr());
    let tc = TestConnection::start(conn);

    // Negotiation never completes, so both transfers sit queued and
    // both calls are awaiting responses.
    let (k1, c1) = OutboundCall::new("Write", Bytes::from_static(b"a"), RpcController::new());
    let (k2, c2) = OutboundCall::new("Write", Bytes::from_static(b"b"), RpcController::new());
    tc.handle.queue_outbound_call(k1);
    tc.handle.queue_outbound_call(k2);
    wait_for(&tc.handle, "calls registered", |i| i.calls_in_flight.len() == 2).await;

    tc.handle.shutdown(ConnError::ShuttingDown);

    assert_eq!(
        c1.await.unwrap(),
        Err(CallError::Conn(ConnError::ShuttingDown))
    );
    assert_eq!(
        c2.await.unwrap(),
        Err(CallError::Conn(ConnError::ShuttingDown))
    );

    // Nothing ever hit the wire; the socket just closes.
    assert!(peer.drain().is_empty());
    peer.expect_eof().await.unwrap();
    tc.join().await;
}

#[tokio::test]
async fn shutdown_aborts_queued_server_responses() {
    init_tracing();
    let (socket, peer) = MemSocket::pair();
    let (dispatcher, mut calls) = RecordingDispatcher::new();
    let metrics = RpcMetrics::new();
    let conn = Connection::server(socket, test_addr(), Protocol::Native, dispatcher)
        .with_metrics(metrics.clone());
    let tc = TestConnection::start(conn);

    // Reads run from registration; responses queue behind the
    // still-incomplete negotiation.
    for call_id in 1..=3 {
        peer.write_all(&request_wire(call_id, b"q")).await.unwrap();
    }
    for _ in 0..3 {
        let call = expect_native(calls.recv().await.expect("inbound call"));
        call.respond_ok(Bytes::from_static(b"r")).unwrap();
    }
    wait_for(&tc.handle, "responses queued", |i| {
        i.calls_in_flight.len() == 3
    })
    .await;

    tc.handle.shutdown(ConnError::ShuttingDown);
    tc.join().await;

    // All three transfers were aborted, none transmitted.
    assert!(peer.drain().is_empty());
    peer.expect_eof().await.unwrap();
    assert_eq!(metrics.outbound_transfer_count(), 0);
    assert_eq!(metrics.connections_torn_down(), 1);
}

#[tokio::test]
async fn negotiation_failure_tears_down_without_writing() {
    init_tracing();
    let (socket, peer) = MemSocket::pair();
    let conn = Connection::client(socket, test_addr());
    let tc = TestConnection::start(conn);

    let (call, completion) =
        OutboundCall::new("Ping", Bytes::from_static(b"x"), RpcController::new());
    tc.handle.queue_outbound_call(call);
    wait_for(&tc.handle, "call registered", |i| i.calls_in_flight.len() == 1).await;

    let failure = ConnError::Network {
        kind: io::ErrorKind::ConnectionReset,
        message: "handshake aborted".to_owned(),
    };
    tc.handle.complete_negotiation(Err(failure.clone()));

    // The queued call fails with the negotiation error; the write
    // watcher never started, so not a byte reached the peer.
    assert_eq!(completion.await.unwrap(), Err(CallError::Conn(failure)));
    assert!(peer.drain().is_empty());
    peer.expect_eof().await.unwrap();
    tc.join().await;
}

#[tokio::test]
async fn cql_request_response() {
    init_tracing();
    let (socket, peer) = MemSocket::pair();
    let (dispatcher, mut calls) = RecordingDispatcher::new();
    let conn = Connection::server(socket, test_addr(), Protocol::Cql, dispatcher);
    let tc = TestConnection::start(conn);
    tc.handle.complete_negotiation(Ok(creds()));

    // QUERY (0x07) frame on stream 9.
    let request = flatten(
        corvus_rpc::protocol::cql::encode_frame(0x04, 0, 9, 0x07, Bytes::from_static(b"select"))
            .unwrap(),
    );
    peer.write_all(&request).await.unwrap();

    let call = match calls.recv().await.expect("cql call") {
        InboundCall::Cql(call) => call,
        other => panic!("expected a cql call, got {other:?}"),
    };
    assert_eq!(call.stream_id(), 9);
    assert_eq!(call.opcode(), 0x07);
    assert_eq!(call.body(), &Bytes::from_static(b"select"));

    // RESULT (0x08) echoing the stream id.
    let response = flatten(
        corvus_rpc::protocol::cql::encode_frame(0x84, 0, 9, 0x08, Bytes::from_static(b"rows"))
            .unwrap(),
    );
    call.respond(Bytes::from(response.clone()));
    assert_eq!(peer.read_exact(response.len()).await.unwrap(), response);

    tc.stop().await;
}
