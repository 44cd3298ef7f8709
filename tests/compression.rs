//! GZIP request/response compression (`spec.md` S2).

mod common;

use hrpc::wire::Compression;
use hrpc::ServerConfig;

use common::{start_server, Client};

#[test]
fn gzip_request_and_response_round_trip() {
    let config = ServerConfig::builder().port(0).build();
    let (server, addr) = start_server(config);

    let mut client = Client::connect_v4(addr).unwrap();
    let payload = b"the quick brown fox jumps over the lazy dog".repeat(16);
    client
        .send_call(
            42,
            Compression::Gzip,
            Compression::Gzip,
            false,
            None,
            &payload,
        )
        .unwrap();

    let reply = client.read_reply(false).unwrap();
    assert!(!reply.error);
    assert_eq!(reply.body, payload);

    server.stop();
    server.join();
}

#[test]
fn request_gzip_with_response_uncompressed() {
    let config = ServerConfig::builder().port(0).build();
    let (server, addr) = start_server(config);

    let mut client = Client::connect_v4(addr).unwrap();
    client
        .send_call(1, Compression::Gzip, Compression::None, false, None, b"ping")
        .unwrap();

    let reply = client.read_reply(false).unwrap();
    assert!(!reply.error);
    assert_eq!(reply.body, b"pong");

    server.stop();
    server.join();
}

#[test]
fn unsupported_response_compression_tag_is_reported_as_application_error() {
    let config = ServerConfig::builder().port(0).build();
    let (server, addr) = start_server(config);

    let mut client = Client::connect_v4(addr).unwrap();
    client
        .send_call(
            9,
            Compression::None,
            Compression::Unsupported(200),
            false,
            None,
            b"ping",
        )
        .unwrap();

    let reply = client.read_reply(false).unwrap();
    assert!(reply.error);
    assert_eq!(
        reply.error_class.as_deref(),
        Some("hrpc.UnsupportedCompressionException")
    );

    server.stop();
    server.join();
}
