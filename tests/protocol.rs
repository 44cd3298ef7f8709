//! Framing edge cases (`spec.md` S4): bad magic, keepalives, and truncated
//! frames never reach the dispatcher.

mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use hrpc::ServerConfig;

use common::{start_server, Client};

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}

#[test]
fn bad_magic_closes_the_connection_without_a_reply() {
    let config = ServerConfig::builder().port(0).build();
    let (server, addr) = start_server(config);

    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(b"nope").unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();

    let mut buf = [0u8; 8];
    let result = stream.read(&mut buf);
    // Either the peer hangs up (Ok(0)) or the read times out; either way no
    // frame was ever produced.
    match result {
        Ok(n) => assert_eq!(n, 0, "server should not have replied to bad magic"),
        Err(e) => assert!(matches!(
            e.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        )),
    }

    server.stop();
    server.join();
}

#[test]
fn ping_frames_are_never_dispatched() {
    let config = ServerConfig::builder().port(0).build();
    let (server, addr) = start_server(config);

    let mut client = Client::connect_v4(addr).unwrap();
    client.send_ping().unwrap();
    client.send_ping().unwrap();
    client.send_simple_call(1, b"ping").unwrap();

    // The first reply read off the wire must be the call's reply, not
    // anything produced by the two pings ahead of it.
    let reply = client.read_reply(false).unwrap();
    assert_eq!(reply.call_id, 1);
    assert_eq!(reply.body, b"pong");

    server.stop();
    server.join();
}

#[test]
fn truncated_frame_never_produces_a_reply_and_connection_is_reclaimed() {
    let config = ServerConfig::builder().port(0).build();
    let (server, addr) = start_server(config);

    {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(&hrpc::wire::MAGIC).unwrap();
        stream.write_all(&[4u8]).unwrap();
        // Identity frame, well-formed.
        hrpc::wire::write_length_prefix(&mut stream, 0).unwrap();
        // Declare a call frame far larger than what is actually sent, then
        // drop the connection before completing it.
        hrpc::wire::write_length_prefix(&mut stream, 4096).unwrap();
        stream.write_all(&[1, 2, 3]).unwrap();
        // `stream` drops here, closing the socket mid-frame.
    }

    assert!(
        wait_until(|| server.connection_count() == 0, Duration::from_secs(2)),
        "server should reclaim the connection once the peer vanishes mid-frame"
    );

    server.stop();
    server.join();
}
