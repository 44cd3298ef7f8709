//! Lifecycle state transitions (`spec.md` §4.5):
//! `constructed -> running -> stopping -> stopped`.

mod common;

use hrpc::ServerConfig;

use common::{start_server, Client};

#[test]
fn stop_is_idempotent_and_join_returns_after_stop() {
    let config = ServerConfig::builder().port(0).build();
    let (server, addr) = start_server(config);

    let mut client = Client::connect_v4(addr).unwrap();
    client.send_simple_call(1, b"ping").unwrap();
    let reply = client.read_reply(false).unwrap();
    assert_eq!(reply.body, b"pong");

    server.stop();
    server.stop(); // idempotent
    server.join();
    server.join(); // idempotent: nothing left to join
}

#[test]
#[should_panic(expected = "Server::start called more than once")]
fn start_twice_panics() {
    let config = ServerConfig::builder().port(0).build();
    let server = std::sync::Arc::new(
        hrpc::Server::builder(std::sync::Arc::new(common::EchoDispatcher))
            .config(config)
            .build()
            .unwrap(),
    );
    server.start();
    server.start();
}

#[test]
fn local_addr_reflects_the_ephemeral_port_chosen_by_the_os() {
    let config = ServerConfig::builder().port(0).build();
    let (server, addr) = start_server(config);
    assert_ne!(addr.port(), 0);
    assert_eq!(server.local_addr(), addr);
    server.stop();
    server.join();
}
