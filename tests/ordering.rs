//! Arrival order into the Call Queue vs. completion order of replies
//! (`spec.md` §8): calls are framed and queued strictly in arrival order per
//! connection, but a faster call queued after a slower one may still finish
//! — and therefore reply — first.

mod common;

use hrpc::ServerConfig;

use common::{start_server, Client};

#[test]
fn faster_later_call_can_reply_before_a_slower_earlier_one() {
    let config = ServerConfig::builder().port(0).handler_count(4).build();
    let (server, addr) = start_server(config);

    let mut client = Client::connect_v4(addr).unwrap();
    // Call 1 is slow; call 2 is immediate. Both are framed and queued before
    // either is handled.
    client.send_simple_call(1, b"sleep:300").unwrap();
    client.send_simple_call(2, b"ping").unwrap();

    let first = client.read_reply(false).unwrap();
    assert_eq!(
        first.call_id, 2,
        "the fast call should be written to the wire first"
    );
    assert_eq!(first.body, b"pong");

    let second = client.read_reply(false).unwrap();
    assert_eq!(second.call_id, 1);
    assert_eq!(second.body, b"sleep:300");

    server.stop();
    server.join();
}

#[test]
fn replies_are_each_associated_with_the_correct_call_id_under_concurrency() {
    let config = ServerConfig::builder().port(0).handler_count(4).build();
    let (server, addr) = start_server(config);

    let mut client = Client::connect_v4(addr).unwrap();
    const N: i32 = 20;
    for id in 0..N {
        client
            .send_simple_call(id, format!("payload-{id}").as_bytes())
            .unwrap();
    }

    let mut seen = std::collections::HashSet::new();
    for _ in 0..N {
        let reply = client.read_reply(false).unwrap();
        assert_eq!(reply.body, format!("payload-{}", reply.call_id).into_bytes());
        assert!(seen.insert(reply.call_id), "duplicate reply for a call id");
    }
    assert_eq!(seen.len(), N as usize);

    server.stop();
    server.join();
}
