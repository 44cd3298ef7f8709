//! Acceptor + Reader (`spec.md` §4.1, §4.2).
//!
//! Both roles share one thread and one `mio::Poll`, exactly as the teacher's
//! `Listener`/`MultiListener` dispatch both `LISTEN_TOKEN` (accept) and
//! per-connection readability off a single `poll().iter()` loop. See
//! `DESIGN.md` for why this single-thread combination is the right read of
//! an otherwise-unstated design choice in `spec.md` §2.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::call::Call;
use crate::compression;
use crate::connection::{Connection, FrameEvent};
use crate::error::{BindError, Error};
use crate::pool::DeserializationPool;
use crate::shared::Shared;
use crate::wire::{self, Compression, OptionsRecord};

const LISTEN_TOKEN: Token = Token(usize::MAX);
const WAKE_TOKEN: Token = Token(usize::MAX - 1);

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Handle used by other roles to ask the I/O loop to wake up, e.g. to force
/// an idle sweep after an out-of-memory recovery (`spec.md` §4.5).
#[derive(Clone)]
pub struct ReaderHandle {
    waker: Arc<Waker>,
    force_sweep: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl ReaderHandle {
    pub fn force_idle_sweep(&self) {
        self.force_sweep.store(true, Ordering::Release);
        let _ = self.waker.wake();
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.waker.wake();
    }
}

/// Bind the listening socket, returning it plus the local address actually
/// bound (so a configured port of `0` can be read back — `spec.md` §4.1).
pub fn bind(addr: SocketAddr, backlog: u32) -> Result<(TcpListener, SocketAddr), Error> {
    use socket2::{Domain, Protocol, Socket, Type};

    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| Error::Bind(BindError::classify(addr, e)))?;
    socket
        .set_reuse_address(true)
        .map_err(Error::Io)?;
    socket
        .bind(&addr.into())
        .map_err(|e| Error::Bind(BindError::classify(addr, e)))?;
    socket
        .listen(backlog as i32)
        .map_err(|e| Error::Bind(BindError::classify(addr, e)))?;
    socket.set_nonblocking(true).map_err(Error::Io)?;

    let std_listener: std::net::TcpListener = socket.into();
    let local_addr = std_listener.local_addr()?;
    Ok((TcpListener::from_std(std_listener), local_addr))
}

/// The combined Acceptor + Reader thread.
pub struct IoLoop {
    listener: TcpListener,
    poll: Poll,
    shared: Arc<Shared>,
    pool: DeserializationPool,
    force_sweep: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    last_sweep: Instant,
}

impl IoLoop {
    /// Build the combined Acceptor/Reader loop on a caller-provided `Poll`.
    ///
    /// The `Poll` is created by the caller (rather than internally) so its
    /// registry can be cloned into `Shared::read_registry` *before* this
    /// loop's socket registrations start — the Writer and Handler paths that
    /// deregister a closed connection's read interest need the clone to
    /// point at this exact `Poll`.
    pub fn new(listener: TcpListener, poll: Poll, shared: Arc<Shared>) -> (Self, ReaderHandle) {
        let waker =
            Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).expect("failed to create Waker"));
        let force_sweep = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let pool = DeserializationPool::new(shared.config.deserialization_pool_max);

        let handle = ReaderHandle {
            waker,
            force_sweep: force_sweep.clone(),
            running: running.clone(),
        };

        let io_loop = Self {
            listener,
            poll,
            shared,
            pool,
            force_sweep,
            running,
            last_sweep: Instant::now() - Duration::from_secs(3600),
        };

        (io_loop, handle)
    }

    /// Run the event loop until `stop()` is called on the matching
    /// `ReaderHandle`. Blocking; intended to be the body of a spawned thread.
    pub fn run(mut self) {
        self.poll
            .registry()
            .register(&mut self.listener, LISTEN_TOKEN, Interest::READABLE)
            .expect("failed to register listening socket");

        let mut events = Events::with_capacity(1024);

        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(Duration::from_secs(1))) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                log::error!("I/O loop poll failed: {e}");
                break;
            }

            for event in events.iter() {
                match event.token() {
                    LISTEN_TOKEN => self.accept(),
                    WAKE_TOKEN => {}
                    token => self.on_readable(token),
                }
            }

            self.maybe_sweep();
        }
    }

    /// Accept up to 10 pending connections per wakeup, amortizing selector
    /// wakeups across bursts of new connections (`spec.md` §4.1).
    fn accept(&mut self) {
        for _ in 0..10 {
            let (stream, remote_addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    return;
                }
            };

            if let Err(e) = stream.set_nodelay(self.shared.config.tcp_nodelay) {
                log::warn!("failed to set TCP_NODELAY for {remote_addr}: {e}");
            }
            let sref = socket2::SockRef::from(&stream);
            if let Err(e) = sref.set_keepalive(self.shared.config.so_keepalive) {
                log::warn!("failed to set SO_KEEPALIVE for {remote_addr}: {e}");
            }

            let connection = self
                .shared
                .registry
                .insert_with(|token| Connection::new(token, stream, remote_addr, now_ms()));

            let register_result = connection.with_stream(|s| {
                self.poll
                    .registry()
                    .register(s, connection.token(), Interest::READABLE)
            });
            if let Err(e) = register_result {
                log::warn!("failed to register accepted socket {remote_addr}: {e}");
                self.shared.registry.remove(connection.token());
                continue;
            }

            log::debug!(
                "accepted connection {:?} from {remote_addr}",
                connection.token()
            );
        }
    }

    fn on_readable(&mut self, token: Token) {
        let Some(connection) = self.shared.registry.get(token) else {
            return;
        };

        let shared = self.shared.clone();
        let registry_handle = self
            .poll
            .registry()
            .try_clone()
            .expect("failed to clone Poll registry");

        // Clearing read interest is implicit: mio is edge-triggered, so
        // simply not polling this socket's framing state again until the
        // pool job below finishes and re-arms it is sufficient — no separate
        // deregister/register round trip is needed to achieve the
        // single-owner guarantee `spec.md` §4.2 asks for.
        self.pool.submit(move || {
            frame_and_dispatch(&shared, &connection);
            let rearm = connection.with_stream(|s| {
                registry_handle.reregister(s, connection.token(), Interest::READABLE)
            });
            if let Err(e) = rearm {
                if !connection.is_closed() {
                    log::warn!(
                        "failed to re-arm read interest for {:?}: {e}",
                        connection.token()
                    );
                }
            }
        });
    }

    fn maybe_sweep(&mut self) {
        let forced = self.force_sweep.swap(false, Ordering::AcqRel);
        let over_threshold = self.shared.registry.len() > self.shared.config.idle_threshold;
        let interval_elapsed = self.last_sweep.elapsed() >= self.shared.config.sweep_interval;

        if !forced && !(over_threshold && interval_elapsed) {
            return;
        }
        self.last_sweep = Instant::now();

        let evicted = self.shared.registry.sweep_idle(
            now_ms(),
            self.shared.config.max_idle,
            self.shared.config.max_evictions_per_sweep,
        );
        for connection in evicted {
            log::debug!("idle sweep evicting {:?}", connection.token());
            self.shared.close_connection(&connection);
        }
    }
}

/// Run the framing state machine as far as it will go without blocking,
/// constructing and enqueuing Calls (`spec.md` §4.2). Executed on a
/// Deserialization Pool worker thread.
fn frame_and_dispatch(shared: &Arc<Shared>, connection: &Arc<Connection>) {
    loop {
        if connection.is_closed() {
            return;
        }

        let event = connection.with_stream(|stream| {
            let mut framing = connection.framing.lock();
            framing.read_frame(stream)
        });

        match event {
            Ok(FrameEvent::WouldBlock) => return,
            Ok(FrameEvent::Ping) => {
                connection.touch(now_ms());
                continue;
            }
            Ok(FrameEvent::Identity(identity)) => {
                connection.set_identity(identity);
                connection.touch(now_ms());
                continue;
            }
            Ok(FrameEvent::Call(payload)) => {
                connection.touch(now_ms());
                if let Err(e) = parse_and_enqueue_call(shared, connection, payload) {
                    log::warn!("decode error on {:?}: {e}", connection.token());
                    shared.close_connection(connection);
                    return;
                }
            }
            Err(e) => {
                match &e {
                    Error::Protocol(msg) => {
                        log::warn!("protocol error on {:?}: {msg}", connection.token())
                    }
                    Error::Io(io_err) if io_err.kind() == ErrorKind::UnexpectedEof => {
                        log::debug!("connection {:?} closed by peer", connection.token())
                    }
                    other => log::warn!("I/O error on {:?}: {other}", connection.token()),
                }
                shared.close_connection(connection);
                return;
            }
        }
    }
}

fn parse_and_enqueue_call(
    shared: &Arc<Shared>,
    connection: &Arc<Connection>,
    payload: Vec<u8>,
) -> Result<(), Error> {
    let mut cursor = &payload[..];
    let version = connection.wire_version();

    let call_id = wire::read_call_id(&mut cursor).map_err(|e| Error::Decode(e.to_string()))?;

    let options = if version >= 4 {
        OptionsRecord::decode(&mut cursor).map_err(|e| Error::Decode(e.to_string()))?
    } else {
        OptionsRecord {
            tx_compression: Compression::None,
            rx_compression: Compression::None,
            profile_requested: false,
            tag: None,
        }
    };

    let mut body = compression::decompressing_reader(options.rx_compression, cursor)
        .map_err(|e| Error::Decode(e.to_string()))?;

    let request = shared
        .dispatcher
        .decode_request(&mut body)
        .map_err(|e| Error::Decode(e.to_string()))?;

    connection.increment_outstanding();

    let call = Call {
        id: call_id,
        connection: Arc::downgrade(connection),
        received_at: Instant::now(),
        serve_started_at: None,
        version,
        rx_compression: options.rx_compression,
        tx_compression: options.tx_compression,
        profile_requested: options.profile_requested,
        tag: options.tag,
        request,
        partial_response_size: std::sync::atomic::AtomicUsize::new(0),
        response: None,
    };

    shared.call_queue.put(call);
    Ok(())
}
