//! End-to-end exercise of a full client session: a fake client connects to
//! [`ClientSession`], which authenticates it and relays queries to a fake
//! upstream PostgreSQL server running in another thread. Matches spec.md
//! §8 scenarios S4 (query executor happy path) and S5 (error path), driven
//! over real loopback sockets rather than synthetic buffers.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use arc_swap::ArcSwap;

use pgvictoria::config::{AuthMethod, CommonConfig, ConfigHandle, LogLevel, MainConfig};
use pgvictoria::protocol::backend::{
    self, ColumnMeta, connection_refused, msg_type as backend_msg_type,
};
use pgvictoria::protocol::codec::read_cstr;
use pgvictoria::protocol::frontend::startup::{InboundRequest, parse_inbound_request};
use pgvictoria::protocol::frontend::{msg_type as frontend_msg_type, write_password, write_startup};
use pgvictoria::protocol::types::{FormatCode, TransactionStatus};
use pgvictoria::session::ClientSession;
use pgvictoria::{Server, User};

fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut type_byte = [0u8; 1];
    stream.read_exact(&mut type_byte).expect("read type byte");
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).expect("read length");
    let len = i32::from_be_bytes(len_bytes) as usize - 4;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).expect("read payload");
    (type_byte[0], payload)
}

fn read_startup_phase_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).expect("read length");
    let len = i32::from_be_bytes(len_bytes) as usize - 4;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).expect("read payload");
    payload
}

/// Runs a minimal fake PostgreSQL server: declines TLS, requires a
/// cleartext password, then answers exactly two simple queries before
/// the client disconnects.
fn fake_upstream_server(listener: TcpListener, expected_password: &'static str) {
    let (mut stream, _) = listener.accept().expect("accept upstream connection");

    loop {
        let body = read_startup_phase_frame(&mut stream);
        match parse_inbound_request(&body).expect("parse startup-phase request") {
            InboundRequest::Ssl => {
                stream.write_all(b"N").expect("decline TLS");
            }
            InboundRequest::Startup { .. } => break,
            InboundRequest::Cancel { .. } => panic!("unexpected CancelRequest from proxy"),
        }
    }

    let mut buf = Vec::new();
    backend::auth::write_auth_cleartext(&mut buf);
    stream.write_all(&buf).expect("send auth request");

    let (type_byte, payload) = read_frame(&mut stream);
    assert_eq!(type_byte, frontend_msg_type::PASSWORD);
    let (password, _) = read_cstr(&payload).expect("parse password");
    assert_eq!(password, expected_password);

    buf.clear();
    backend::auth::write_auth_ok(&mut buf);
    backend::auth::write_backend_key_data(&mut buf, 999, 888);
    backend::auth::write_ready_for_query(&mut buf, TransactionStatus::Idle);
    stream.write_all(&buf).expect("send auth ok + ready");

    for _ in 0..2 {
        let (type_byte, payload) = read_frame(&mut stream);
        assert_eq!(type_byte, frontend_msg_type::QUERY);
        let (sql, _) = read_cstr(&payload).expect("parse query text");

        buf.clear();
        if sql == "SELECT 1" {
            let columns = vec![ColumnMeta {
                name: "?column?".into(),
                table_oid: 0,
                column_id: 0,
                type_oid: 23,
                type_size: 4,
                type_modifier: -1,
                format: FormatCode::Text,
            }];
            backend::write_row_description(&mut buf, &columns);
            backend::write_data_row(&mut buf, &[Some(b"1".to_vec())]);
            backend::write_command_complete(&mut buf, "SELECT 1");
        } else {
            let fields = pgvictoria::ErrorFields::fatal("42601", "syntax error");
            backend::write_error_response(&mut buf, &fields);
        }
        backend::auth::write_ready_for_query(&mut buf, TransactionStatus::Idle);
        stream.write_all(&buf).expect("send query response");
    }
}

fn make_config(server: Server, user: User) -> ConfigHandle {
    Arc::new(ArcSwap::from_pointee(MainConfig {
        common: CommonConfig {
            home_directory: PathBuf::new(),
            log_type: Default::default(),
            log_level: LogLevel::Info,
            log_mode: Default::default(),
            log_path: None,
            log_line_prefix: None,
            log_rotation_size: None,
            log_rotation_age_secs: None,
            servers: vec![server],
            users: vec![user],
            config_path: PathBuf::new(),
            users_path: PathBuf::new(),
        },
        running: true,
        host: "*".into(),
        port: 0,
        authentication_timeout_secs: 60,
        pidfile: None,
        update_process_title: Default::default(),
        libev: None,
        backlog: 16,
        hugepage: Default::default(),
        unix_socket_dir: None,
        auth_method: AuthMethod::Cleartext,
        tls_cert_file: None,
        tls_key_file: None,
    }))
}

#[test]
fn full_session_relays_queries_to_upstream_and_reports_backend_errors() {
    let upstream_listener = TcpListener::bind("127.0.0.1:0").expect("bind upstream");
    let upstream_addr = upstream_listener.local_addr().expect("upstream addr");
    let upstream = thread::spawn(move || fake_upstream_server(upstream_listener, "hunter2"));

    let server = Server {
        name: "primary".into(),
        host: upstream_addr.ip().to_string(),
        port: upstream_addr.port(),
        primary: true,
        username: "app".into(),
        server_version_major: 0,
        server_version_minor: 0,
    };
    let user = User {
        username: "alice".into(),
        password: "hunter2".into(),
    };
    let config = make_config(server, user);

    let proxy_listener = TcpListener::bind("127.0.0.1:0").expect("bind proxy");
    let proxy_addr = proxy_listener.local_addr().expect("proxy addr");
    let proxy = thread::spawn(move || {
        let (stream, _) = proxy_listener.accept().expect("accept client connection");
        ClientSession::new(stream, config).run()
    });

    let mut client = TcpStream::connect(proxy_addr).expect("client connect");

    let mut buf = Vec::new();
    write_startup(&mut buf, &[("user", "alice"), ("database", "appdb")]);
    client.write_all(&buf).expect("send startup");

    let (type_byte, _) = read_frame(&mut client);
    assert_eq!(type_byte, backend_msg_type::AUTHENTICATION);

    buf.clear();
    write_password(&mut buf, "hunter2");
    client.write_all(&buf).expect("send password");

    let (type_byte, _) = read_frame(&mut client);
    assert_eq!(type_byte, backend_msg_type::AUTHENTICATION);
    let (type_byte, _) = read_frame(&mut client);
    assert_eq!(type_byte, backend_msg_type::BACKEND_KEY_DATA);
    let (type_byte, _) = read_frame(&mut client);
    assert_eq!(type_byte, backend_msg_type::READY_FOR_QUERY);

    // S4: happy path.
    buf.clear();
    pgvictoria::protocol::frontend::simple::write_query(&mut buf, "SELECT 1");
    client.write_all(&buf).expect("send SELECT 1");

    let (type_byte, _) = read_frame(&mut client);
    assert_eq!(type_byte, backend_msg_type::ROW_DESCRIPTION);
    let (type_byte, payload) = read_frame(&mut client);
    assert_eq!(type_byte, backend_msg_type::DATA_ROW);
    assert_eq!(&payload[2 + 4..], b"1");
    let (type_byte, payload) = read_frame(&mut client);
    assert_eq!(type_byte, backend_msg_type::COMMAND_COMPLETE);
    let (tag, _) = read_cstr(&payload).expect("command tag");
    assert_eq!(tag, "SELECT 1");
    let (type_byte, _) = read_frame(&mut client);
    assert_eq!(type_byte, backend_msg_type::READY_FOR_QUERY);

    // S5: backend error path.
    buf.clear();
    pgvictoria::protocol::frontend::simple::write_query(&mut buf, "GARBAGE");
    client.write_all(&buf).expect("send bad query");

    let (type_byte, payload) = read_frame(&mut client);
    assert_eq!(type_byte, backend_msg_type::ERROR_RESPONSE);
    let fields = backend::ErrorResponse::parse(&payload).expect("parse error response").fields;
    assert_eq!(fields.code(), "42601");
    assert_eq!(fields.message(), "syntax error");
    let (type_byte, _) = read_frame(&mut client);
    assert_eq!(type_byte, backend_msg_type::READY_FOR_QUERY);

    buf.clear();
    pgvictoria::protocol::frontend::write_terminate(&mut buf);
    client.write_all(&buf).expect("send terminate");

    assert!(proxy.join().expect("proxy thread").is_ok());
    upstream.join().expect("upstream thread");
}

#[test]
fn unknown_role_is_refused_before_handshake() {
    let server = Server {
        name: "primary".into(),
        host: "127.0.0.1".into(),
        port: 5432,
        primary: true,
        username: "app".into(),
        server_version_major: 0,
        server_version_minor: 0,
    };
    let user = User {
        username: "alice".into(),
        password: "hunter2".into(),
    };
    let config = make_config(server, user);

    let proxy_listener = TcpListener::bind("127.0.0.1:0").expect("bind proxy");
    let proxy_addr = proxy_listener.local_addr().expect("proxy addr");
    let proxy = thread::spawn(move || {
        let (stream, _) = proxy_listener.accept().expect("accept client connection");
        ClientSession::new(stream, config).run()
    });

    let mut client = TcpStream::connect(proxy_addr).expect("client connect");
    let mut buf = Vec::new();
    write_startup(&mut buf, &[("user", "ghost"), ("database", "appdb")]);
    client.write_all(&buf).expect("send startup");

    let (type_byte, payload) = read_frame(&mut client);
    assert_eq!(type_byte, backend_msg_type::ERROR_RESPONSE);

    let mut expected = Vec::new();
    connection_refused(&mut expected, "role does not exist");
    assert_eq!(&expected[5..], &payload[..]);

    assert!(proxy.join().expect("proxy thread").is_ok());
}
