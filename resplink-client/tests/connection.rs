mod common;

use std::io;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use resplink_client::{
    commands, reply, Arg, Client, ClientError, Command, Connection, ConnectionPool, ConnectionState,
    Event, ReconnectPolicy, Ttl,
};

use common::*;

#[test]
fn set_command_wire_bytes() {
    init_tracing();
    let transport = ScriptedTransport::new().replying(b"+OK\r\n");
    let written = transport.written();
    let mut conn = Connection::connect(transport, config_with_policy(ReconnectPolicy::disabled()))
        .expect("connect");

    conn.call(&commands::set("test1", "hello world")).expect("set");

    assert_eq!(
        &written.lock().unwrap()[..],
        b"*3\r\n$3\r\nSET\r\n$5\r\ntest1\r\n$11\r\nhello world\r\n"
    );
}

#[test]
fn arguments_arrive_as_bulk_strings() {
    init_tracing();
    let addr = spawn_server(1, |_, args, stream| {
        assert_eq!(args.len(), 5);
        assert_eq!(args[0], b"RPUSH");
        assert_eq!(args[1], b"list");
        assert_eq!(args[2], [0u8, 255, 13, 10]);
        assert_eq!(args[3], b"-42");
        assert_eq!(args[4], b"1.5");
        write_integer(stream, 3);
    });

    let mut conn = Connection::open(config_with_addr(addr)).expect("connect");
    let cmd = Command::new("RPUSH", reply::integer())
        .arg("list")
        .arg(&[0u8, 255, 13, 10][..])
        .arg(-42i64)
        .arg(Arg::display(1.5));
    assert_eq!(conn.call(&cmd).expect("rpush"), 3);
}

#[test]
fn get_missing_key_is_none() {
    init_tracing();
    let addr = spawn_server(2, |idx, args, stream| {
        assert_eq!(args[0], b"GET");
        if idx == 0 {
            write_null(stream);
        } else {
            write_bulk(stream, b"");
        }
    });

    let mut conn = Connection::open(config_with_addr(addr)).expect("connect");
    assert_eq!(conn.call(&commands::get("missing")).expect("get"), None);
    assert_eq!(
        conn.call(&commands::get("empty")).expect("get"),
        Some(Bytes::new())
    );
}

#[test]
fn reconnects_once_after_transient_failure() {
    init_tracing();
    let transport = ScriptedTransport::new()
        .failing(io::ErrorKind::ConnectionReset)
        .replying(b"+PONG\r\n");
    let connects = transport.connects();
    let mut conn = Connection::connect(
        transport,
        config_with_policy(ReconnectPolicy::limited(1, Duration::ZERO)),
    )
    .expect("connect");
    let mut events = conn.events();

    assert_eq!(conn.call(&commands::ping()).expect("ping"), "PONG");

    assert_eq!(events.try_recv().expect("event"), Event::Reconnected { attempts: 1 });
    assert!(events.try_recv().is_err());
    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[test]
fn zero_attempts_fail_without_retry() {
    init_tracing();
    let transport = ScriptedTransport::new()
        .failing(io::ErrorKind::ConnectionReset)
        .replying(b"+PONG\r\n");
    let connects = transport.connects();
    let mut conn = Connection::connect(transport, config_with_policy(ReconnectPolicy::disabled()))
        .expect("connect");
    let mut events = conn.events();

    let err = conn.call(&commands::ping()).unwrap_err();
    assert!(matches!(err, ClientError::Io(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert!(events.try_recv().is_err());
    assert_eq!(conn.state(), ConnectionState::Failed);
}

#[test]
fn reconnect_waits_between_attempts() {
    init_tracing();
    let transport = ScriptedTransport::new().failing(io::ErrorKind::BrokenPipe);
    let connects = transport.connects();
    let mut conn = Connection::connect(
        transport,
        config_with_policy(ReconnectPolicy::limited(3, Duration::from_millis(20))),
    )
    .expect("connect");

    let started = std::time::Instant::now();
    let err = conn.call(&commands::ping()).unwrap_err();
    assert!(matches!(err, ClientError::ReconnectExhausted { attempts: 3, .. }));
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(connects.load(Ordering::SeqCst), 4);
}

#[test]
fn stream_to_copies_bulk_reply() {
    init_tracing();
    let addr = spawn_server(1, |_, args, stream| {
        assert_eq!(args[0], b"GET");
        write_bulk(stream, &[7u8; 10_000]);
    });

    let mut conn = Connection::open(config_with_addr(addr)).expect("connect");
    let mut sink = Vec::new();
    let copied = conn
        .stream_to_with(&commands::get("blob"), &mut sink, 1024)
        .expect("stream");
    assert_eq!(copied, Some(10_000));
    assert_eq!(sink, vec![7u8; 10_000]);
    assert!(conn.is_healthy());
}

#[test]
fn shutdown_handle_unblocks_pending_read() {
    init_tracing();
    let addr = spawn_server(1, |_, _, _| {
        thread::sleep(Duration::from_millis(1500));
    });

    let mut config = config_with_addr(addr);
    config.read_timeout = Some(Duration::from_secs(10));
    config.reconnect = ReconnectPolicy::disabled();
    let mut conn = Connection::open(config).expect("connect");
    let handle = conn.shutdown_handle().expect("handle");

    let worker = thread::spawn(move || conn.call(&commands::ping()));
    thread::sleep(Duration::from_millis(100));
    handle.shutdown().expect("shutdown");

    let result = worker.join().expect("join");
    assert!(result.unwrap_err().is_transport());
}

#[test]
fn client_set_get_roundtrip() {
    init_tracing();
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args[0], b"SET");
            assert_eq!(args[1], b"key");
            assert_eq!(args[2], b"value");
            write_simple(stream, "OK");
        } else {
            assert_eq!(args[0], b"GET");
            assert_eq!(args[1], b"key");
            write_bulk(stream, b"value");
        }
    });

    let client = Client::with_config(config_with_addr(addr)).expect("client");
    client.set("key", "value").expect("set");
    let value = client.get("key").expect("get");
    assert_eq!(value, Some(Bytes::from_static(b"value")));
}

#[test]
fn client_ttl_and_delete() {
    init_tracing();
    let addr = spawn_server(3, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args[0], b"TTL");
            write_integer(stream, 5);
        }
        1 => {
            assert_eq!(args[0], b"DEL");
            write_integer(stream, 1);
        }
        _ => {
            assert_eq!(args[0], b"TTL");
            write_integer(stream, -2);
        }
    });

    let client = Client::with_config(config_with_addr(addr)).expect("client");
    assert_eq!(client.ttl("key").expect("ttl"), Ttl::ExpiresIn(Duration::from_secs(5)));
    assert!(client.delete("key").expect("delete"));
    assert_eq!(client.ttl("key").expect("ttl"), Ttl::Missing);
}

#[test]
fn client_surfaces_server_errors_and_keeps_connection() {
    init_tracing();
    let addr = spawn_server(2, |idx, _, stream| {
        if idx == 0 {
            write_error(stream, "WRONGTYPE Operation against a key holding the wrong kind of value");
        } else {
            write_simple(stream, "PONG");
        }
    });

    let client = Client::with_config(config_with_addr(addr)).expect("client");
    let err = client.get("list").unwrap_err();
    assert!(err.server_message().unwrap().starts_with("WRONGTYPE"));
    // A single accept on the server: the pooled connection was reused.
    assert_eq!(client.ping().expect("ping"), "PONG");
}

#[test]
fn pool_exhaustion_is_reported() {
    init_tracing();
    let addr = spawn_server(0, |_, _, _| {});
    let pool = ConnectionPool::new(config_with_addr(addr)).expect("pool");

    let held = pool.acquire().expect("first");
    assert!(matches!(pool.acquire(), Err(ClientError::PoolExhausted)));
    drop(held);
    assert_eq!(pool.stats(), (1, 1));
}

#[test]
fn invalid_address_is_rejected() {
    let err = Client::connect("localhost-without-port").err().expect("error");
    assert!(matches!(err, ClientError::InvalidAddress(_)));
}
