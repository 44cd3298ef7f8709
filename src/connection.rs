//! `Connection` — one accepted TCP socket plus its framing scratchpad and
//! response queue (`spec.md` §3).
//!
//! Locking is split per concern (framing vs. responses vs. identity) instead
//! of wrapping the whole `Connection` in one `Mutex`, as the teacher's own
//! `worker.rs` module comment flags as the fix for lock contention between
//! unrelated concerns sharing a single connection-wide lock.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::time::Instant;

use mio::net::TcpStream;
use mio::Token;
use parking_lot::Mutex;

use crate::error::Error;
use crate::wire::{self, MAGIC, MIN_VERSION, CURRENT_VERSION, PING_SENTINEL};

/// Resumable fixed-size read: tracks how many of `buf.len()` bytes have been
/// filled so a `WouldBlock` never discards progress.
struct PartialRead {
    buf: Vec<u8>,
    filled: usize,
}

impl PartialRead {
    fn new(size: usize) -> Self {
        Self {
            buf: vec![0u8; size],
            filled: 0,
        }
    }

    /// Attempt to fill the remainder of `buf` from `stream` without blocking.
    /// Returns `Ok(true)` once complete, `Ok(false)` on `WouldBlock`.
    fn fill(&mut self, stream: &mut impl Read) -> io::Result<bool> {
        while self.filled < self.buf.len() {
            match stream.read(&mut self.buf[self.filled..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "peer closed mid-frame",
                    ))
                }
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

enum Phase {
    Magic(PartialRead),
    Version(PartialRead),
    Length(PartialRead),
    Payload(PartialRead),
}

/// Outcome of one `FramingState::read_frame` step.
pub enum FrameEvent {
    /// No complete frame is available yet; state was preserved.
    WouldBlock,
    /// A keepalive frame (`spec.md` §4.2 step 3). Never dispatched.
    Ping,
    /// The first payload on the connection: the opaque identity blob.
    Identity(Vec<u8>),
    /// A subsequent payload: an undecoded Call frame.
    Call(Vec<u8>),
}

/// Per-connection framing scratchpad (`spec.md` §3's "framing-state
/// scratchpad"). Exactly one worker ever touches this at a time, guaranteed
/// by the Reader clearing READ interest before handing the socket to the
/// Deserialization Pool and only re-arming once the worker is done
/// (`spec.md` §4.2).
pub struct FramingState {
    phase: Phase,
    header_read: bool,
    /// Negotiated wire version. Valid only once `header_read` becomes reachable,
    /// i.e. after the handshake frame has been parsed.
    pub version: u8,
}

impl Default for FramingState {
    fn default() -> Self {
        Self {
            phase: Phase::Magic(PartialRead::new(MAGIC.len())),
            header_read: false,
            version: 0,
        }
    }
}

impl FramingState {
    /// Drive the state machine as far as possible without blocking, yielding
    /// at most one frame event per call (`spec.md` §3 invariant: "the framing
    /// scratchpad parses at most one request before yielding").
    pub fn read_frame(&mut self, stream: &mut impl Read) -> Result<FrameEvent, Error> {
        loop {
            match &mut self.phase {
                Phase::Magic(pr) => {
                    if !pr.fill(stream).map_err(Error::Io)? {
                        return Ok(FrameEvent::WouldBlock);
                    }
                    if pr.buf != MAGIC {
                        return Err(Error::Protocol(format!(
                            "bad magic: {:02x?}, expected {:02x?}",
                            pr.buf, MAGIC
                        )));
                    }
                    self.phase = Phase::Version(PartialRead::new(1));
                }
                Phase::Version(pr) => {
                    if !pr.fill(stream).map_err(Error::Io)? {
                        return Ok(FrameEvent::WouldBlock);
                    }
                    let version = pr.buf[0];
                    if !(MIN_VERSION..=CURRENT_VERSION).contains(&version) {
                        return Err(Error::Protocol(format!(
                            "unsupported version {version}, expected {MIN_VERSION}..={CURRENT_VERSION}"
                        )));
                    }
                    self.version = version;
                    self.phase = Phase::Length(PartialRead::new(4));
                }
                Phase::Length(pr) => {
                    if !pr.fill(stream).map_err(Error::Io)? {
                        return Ok(FrameEvent::WouldBlock);
                    }
                    let len = u32::from_be_bytes(pr.buf[..4].try_into().unwrap());
                    if len == PING_SENTINEL {
                        self.phase = Phase::Length(PartialRead::new(4));
                        return Ok(FrameEvent::Ping);
                    }
                    self.phase = Phase::Payload(PartialRead::new(len as usize));
                }
                Phase::Payload(pr) => {
                    if !pr.fill(stream).map_err(Error::Io)? {
                        return Ok(FrameEvent::WouldBlock);
                    }
                    let payload = std::mem::take(&mut pr.buf);
                    self.phase = Phase::Length(PartialRead::new(4));
                    if !self.header_read {
                        self.header_read = true;
                        return Ok(FrameEvent::Identity(payload));
                    }
                    return Ok(FrameEvent::Call(payload));
                }
            }
        }
    }
}

/// One response waiting to be flushed to the wire, plus enough bookkeeping
/// for partial writes and the 15-minute purge (`spec.md` §4.4).
pub struct QueuedResponse {
    pub bytes: Vec<u8>,
    pub written: usize,
    pub enqueued_at: Instant,
}

impl QueuedResponse {
    pub fn remaining(&self) -> &[u8] {
        &self.bytes[self.written..]
    }

    pub fn is_complete(&self) -> bool {
        self.written >= self.bytes.len()
    }
}

/// Per-connection FIFO of responses awaiting write (`spec.md` §3).
#[derive(Default)]
pub struct ResponseQueue {
    items: VecDeque<QueuedResponse>,
}

impl ResponseQueue {
    pub fn push(&mut self, item: QueuedResponse) {
        self.items.push_back(item);
    }

    pub fn front_mut(&mut self) -> Option<&mut QueuedResponse> {
        self.items.front_mut()
    }

    pub fn pop_front(&mut self) {
        self.items.pop_front();
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Drain everything, returning the total bytes still owed to the
    /// Throttler (`spec.md` §3: "the aggregate byte count is returned to the
    /// Throttler in one step" on close).
    pub fn drain_remaining_bytes(&mut self) -> u64 {
        let total: u64 = self
            .items
            .iter()
            .map(|item| item.remaining().len() as u64)
            .sum();
        self.items.clear();
        total
    }
}

/// One accepted TCP socket plus its framing state, response queue, and
/// connection-level bookkeeping (`spec.md` §3).
pub struct Connection {
    token: Token,
    stream: Mutex<TcpStream>,
    remote_addr: SocketAddr,
    last_contact_ms: AtomicI64,
    outstanding: AtomicI32,
    closed: AtomicBool,
    identity: Mutex<Vec<u8>>,
    pub(crate) framing: Mutex<FramingState>,
    pub(crate) responses: Mutex<ResponseQueue>,
}

impl Connection {
    pub fn new(token: Token, stream: TcpStream, remote_addr: SocketAddr, now_ms: i64) -> Self {
        Self {
            token,
            stream: Mutex::new(stream),
            remote_addr,
            last_contact_ms: AtomicI64::new(now_ms),
            outstanding: AtomicI32::new(0),
            closed: AtomicBool::new(false),
            identity: Mutex::new(Vec::new()),
            framing: Mutex::new(FramingState::default()),
            responses: Mutex::new(ResponseQueue::default()),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Borrow the underlying socket for the duration of `f`. Exposed so
    /// callers that need direct `Read`/`Write`/`Registry` access don't each
    /// reimplement the locking.
    pub fn with_stream<R>(&self, f: impl FnOnce(&mut TcpStream) -> R) -> R {
        let mut guard = self.stream.lock();
        f(&mut guard)
    }

    pub fn touch(&self, now_ms: i64) {
        self.last_contact_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn last_contact_ms(&self) -> i64 {
        self.last_contact_ms.load(Ordering::Relaxed)
    }

    pub fn outstanding(&self) -> i32 {
        self.outstanding.load(Ordering::Relaxed)
    }

    pub fn increment_outstanding(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrement_outstanding(&self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the connection closed. Idempotent; returns `true` the first time.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn set_identity(&self, identity: Vec<u8>) {
        *self.identity.lock() = identity;
    }

    pub fn identity(&self) -> Vec<u8> {
        self.identity.lock().clone()
    }

    pub fn wire_version(&self) -> u8 {
        self.framing.lock().version
    }
}
