//! Application errors and the per-call response-size ceiling (`spec.md` S3).

mod common;

use hrpc::ServerConfig;

use common::{start_server, Client};

#[test]
fn application_error_produces_structured_error_frame() {
    let config = ServerConfig::builder().port(0).build();
    let (server, addr) = start_server(config);

    let mut client = Client::connect_v4(addr).unwrap();
    client.send_simple_call(1, b"boom").unwrap();
    let reply = client.read_reply(false).unwrap();

    assert!(reply.error);
    assert_eq!(reply.error_class.as_deref(), Some("test.Boom"));
    assert_eq!(reply.error_message.as_deref(), Some("requested failure"));

    server.stop();
    server.join();
}

#[test]
fn response_over_the_global_ceiling_is_rejected() {
    // `charge-too-much` always charges 1,000,000 bytes; set the server-wide
    // ceiling below that so the request reliably trips it.
    let config = ServerConfig::builder()
        .port(0)
        .max_response_bytes(10)
        .build();
    let (server, addr) = start_server(config);

    let mut client = Client::connect_v4(addr).unwrap();
    client.send_simple_call(2, b"charge-too-much").unwrap();
    let reply = client.read_reply(false).unwrap();

    assert!(reply.error);
    assert_eq!(
        reply.error_class.as_deref(),
        Some("hrpc.ResponseTooLargeException")
    );

    server.stop();
    server.join();
}

#[test]
fn connection_stays_open_after_an_application_error() {
    let config = ServerConfig::builder().port(0).build();
    let (server, addr) = start_server(config);

    let mut client = Client::connect_v4(addr).unwrap();
    client.send_simple_call(1, b"boom").unwrap();
    let first = client.read_reply(false).unwrap();
    assert!(first.error);

    // The same connection should still be usable for a normal call.
    client.send_simple_call(2, b"ping").unwrap();
    let second = client.read_reply(false).unwrap();
    assert!(!second.error);
    assert_eq!(second.body, b"pong");

    server.stop();
    server.join();
}
