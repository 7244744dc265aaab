//! End-to-end scenarios driven through real TCP sockets against a full
//! `Daemon`, with no USB/SPI hardware attached. These exercise the listener
//! accept path, wire framing, and the daemon-addressed (`uid == 1`) request
//! handling that the in-process `network` unit tests can't reach without a
//! real socket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;
use std::time::Duration;

use bd_protocol::{function_id, ErrorCode};
use bd_reactor::Reactor;
use bd_test_support::{request_bytes, NullSpiBackend, NullUsbBackend, TestTcpClient};
use brickd::config::load_config_from_str;
use brickd::daemon::Daemon;

fn spawn_daemon(plain_port: u16, websocket_port: u16, secret: Option<&str>) -> SocketAddr {
    let secret_section = match secret {
        Some(s) => format!("[authentication]\nsecret = \"{s}\"\n"),
        None => String::new(),
    };
    let toml = format!(
        "{secret_section}\n\
         [listen]\n\
         address = \"127.0.0.1\"\n\
         plain_port = {plain_port}\n\
         websocket_port = {websocket_port}\n"
    );
    let config = load_config_from_str(&toml).expect("fixture config parses");

    let mut reactor = Reactor::new().expect("reactor init");
    let mut daemon = Daemon::new(&config, NullUsbBackend, NullSpiBackend, &mut reactor).expect("daemon init");
    thread::spawn(move || {
        let _ = reactor.run(&mut daemon);
    });
    // Give the listener a moment to become accept-ready before tests connect.
    thread::sleep(Duration::from_millis(50));
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), plain_port)
}

#[test]
fn authenticate_before_nonce_disconnects_client() {
    let addr = spawn_daemon(42911, 43011, Some("topsecret"));
    let mut client = TestTcpClient::connect(addr).unwrap();
    let mut payload = 0u32.to_le_bytes().to_vec();
    payload.extend_from_slice(&[0u8; 20]);
    client.send_bytes(&request_bytes(1, function_id::AUTHENTICATE, 1, false, &payload)).unwrap();
    let outcome = client.recv_packet_or_eof();
    assert!(matches!(outcome, Ok(None)) || outcome.is_err(), "server should close the connection");
}

#[test]
fn full_handshake_over_tcp_reaches_done() {
    let addr = spawn_daemon(42912, 43012, Some("topsecret"));
    let mut client = TestTcpClient::connect(addr).unwrap();

    client.send_bytes(&request_bytes(1, function_id::GET_AUTHENTICATION_NONCE, 1, true, &[])).unwrap();
    let nonce_response = client.recv_packet().unwrap();
    assert_eq!(nonce_response.header.function_id, function_id::GET_AUTHENTICATION_NONCE);
    let server_nonce = u32::from_le_bytes(nonce_response.payload[..4].try_into().unwrap());

    let client_nonce = 99u32;
    let digest = brickd::auth::expected_digest(b"topsecret", server_nonce, client_nonce);
    let mut payload = client_nonce.to_le_bytes().to_vec();
    payload.extend_from_slice(&digest);
    client.send_bytes(&request_bytes(1, function_id::AUTHENTICATE, 2, true, &payload)).unwrap();
    let ack = client.recv_packet().unwrap();
    assert_eq!(ack.header.function_id, function_id::AUTHENTICATE);
    assert_eq!(ack.header.error_code_bits, 0);
}

#[test]
fn unknown_daemon_function_gets_error_reply_without_disconnecting() {
    let addr = spawn_daemon(42913, 43013, None);
    let mut client = TestTcpClient::connect(addr).unwrap();
    client.send_bytes(&request_bytes(1, 200, 1, true, &[])).unwrap();
    let response = client.recv_packet().unwrap();
    assert_eq!(response.header.error_code_bits, ErrorCode::FunctionNotSupported as u8);

    // Connection must still be usable after the error reply.
    client.send_bytes(&request_bytes(1, function_id::GET_AUTHENTICATION_NONCE, 2, true, &[])).unwrap();
    let nonce_response = client.recv_packet().unwrap();
    assert_eq!(nonce_response.header.function_id, function_id::GET_AUTHENTICATION_NONCE);
}

#[test]
fn disconnect_probe_is_silently_dropped_and_framing_survives() {
    let addr = spawn_daemon(42914, 43014, None);
    let mut client = TestTcpClient::connect(addr).unwrap();
    client.send_bytes(&request_bytes(1, function_id::DISCONNECT_PROBE, 1, false, &[])).unwrap();
    client.send_bytes(&request_bytes(1, function_id::GET_AUTHENTICATION_NONCE, 2, true, &[])).unwrap();
    let nonce_response = client.recv_packet().unwrap();
    assert_eq!(nonce_response.header.function_id, function_id::GET_AUTHENTICATION_NONCE);
}
