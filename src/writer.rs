//! Writer (`spec.md` §4.4).
//!
//! Owns a second, independent `mio::Poll` from the Reader's, matching the
//! teacher's `Listener::waker()` pattern for breaking a thread out of a
//! blocked `poll()` from elsewhere. The `pending` counter below is the
//! literal NIO-quirk workaround `spec.md` §5 and §9 describe: even though
//! `mio::Registry::register`/`reregister` are individually thread-safe, a
//! `Waker::wake()` racing a Handler's `reregister()` could otherwise be
//! missed while the Writer sits deep inside a 15-minute `poll()`.

use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

use crate::connection::{Connection, QueuedResponse};
use crate::shared::Shared;

const WAKE_TOKEN: Token = Token(usize::MAX - 2);

struct WriterShared {
    registry: Registry,
    waker: Waker,
    pending: AtomicUsize,
    registered: Mutex<HashMap<Token, Arc<Connection>>>,
    running: AtomicBool,
}

/// Handle used by Handler threads to hand a serialized response to the
/// Writer, and by the lifecycle controller to stop it.
#[derive(Clone)]
pub struct WriterHandle {
    inner: Arc<WriterShared>,
}

impl WriterHandle {
    /// Append a serialized response to `connection`'s Response Queue
    /// (`spec.md` §4.4 "Enqueue path"). The caller must have already charged
    /// `bytes.len()` against the Throttler.
    pub fn enqueue(&self, shared: &Arc<Shared>, connection: &Arc<Connection>, bytes: Vec<u8>) {
        let size = bytes.len() as u64;

        let became_first = {
            let mut responses = connection.responses.lock();
            if connection.is_closed() {
                drop(responses);
                shared.throttler.decrease(size);
                return;
            }
            let was_empty = responses.is_empty();
            responses.push(QueuedResponse {
                bytes,
                written: 0,
                enqueued_at: Instant::now(),
            });
            was_empty
        };

        if !became_first {
            // A prior item is already pending; the socket is already
            // registered for write-readiness and will pick this one up too.
            return;
        }

        match drain(shared, connection) {
            DrainOutcome::Emptied => {}
            DrainOutcome::Pending => self.register_for_write(connection),
            DrainOutcome::Error(e) => {
                log::warn!("write error on {:?}: {e}", connection.token());
                shared.close_connection(connection);
            }
        }
    }

    fn register_for_write(&self, connection: &Arc<Connection>) {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        let result = connection.with_stream(|s| {
            self.inner
                .registry
                .register(s, connection.token(), Interest::WRITABLE)
        });
        match result {
            Ok(()) => {
                self.inner
                    .registered
                    .lock()
                    .insert(connection.token(), connection.clone());
            }
            Err(e) => {
                log::warn!(
                    "failed to register write interest for {:?}: {e}",
                    connection.token()
                );
            }
        }
        self.inner.pending.fetch_sub(1, Ordering::AcqRel);
        let _ = self.inner.waker.wake();
    }

    fn deregister(&self, connection: &Arc<Connection>) {
        connection.with_stream(|s| {
            let _ = self.inner.registry.deregister(s);
        });
        self.inner.registered.lock().remove(&connection.token());
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        let _ = self.inner.waker.wake();
    }
}

enum DrainOutcome {
    /// The Response Queue is now empty; no write interest is needed.
    Emptied,
    /// Bytes remain queued; the socket should be (or stay) registered for
    /// write-readiness.
    Pending,
    Error(std::io::Error),
}

/// Non-blocking drain of as much of the Response Queue head as possible
/// (`spec.md` §4.4 "Drain step"), used by both the enqueue fast path and the
/// Writer's own selector loop.
fn drain(shared: &Arc<Shared>, connection: &Arc<Connection>) -> DrainOutcome {
    let mut responses = connection.responses.lock();
    loop {
        let Some(front) = responses.front_mut() else {
            return DrainOutcome::Emptied;
        };

        let chunk_len = front
            .remaining()
            .len()
            .min(shared.config.write_chunk_bytes);
        let write_result = connection.with_stream(|s| s.write(&front.remaining()[..chunk_len]));

        match write_result {
            Ok(0) => return DrainOutcome::Pending,
            Ok(n) => {
                front.written += n;
                if front.is_complete() {
                    let size = front.bytes.len() as u64;
                    responses.pop_front();
                    shared.throttler.decrease(size);
                    connection.decrement_outstanding();
                    if responses.is_empty() {
                        return DrainOutcome::Emptied;
                    }
                    continue;
                }
                return DrainOutcome::Pending;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return DrainOutcome::Pending,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return DrainOutcome::Error(e),
        }
    }
}

/// The Writer thread.
pub struct Writer {
    poll: Poll,
    shared: Arc<Shared>,
    inner: Arc<WriterShared>,
}

impl Writer {
    pub fn new(shared: Arc<Shared>) -> (Self, WriterHandle) {
        let poll = Poll::new().expect("failed to create Writer Poll");
        let waker = Waker::new(poll.registry(), WAKE_TOKEN).expect("failed to create Waker");
        let inner = Arc::new(WriterShared {
            registry: poll
                .registry()
                .try_clone()
                .expect("failed to clone Writer registry"),
            waker,
            pending: AtomicUsize::new(0),
            registered: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        });

        let handle = WriterHandle {
            inner: inner.clone(),
        };
        let writer = Self {
            poll,
            shared,
            inner,
        };
        (writer, handle)
    }

    /// Run until `WriterHandle::stop` is called. Blocking; intended to be
    /// the body of a spawned thread.
    pub fn run(mut self) {
        let mut events = Events::with_capacity(1024);
        let mut last_purge = Instant::now();

        while self.inner.running.load(Ordering::Acquire) {
            // Wait for any in-flight registration to finish before polling,
            // so its `Waker::wake()` is never lost to a selector call that
            // started a moment too early.
            let mut spins = 0;
            while self.inner.pending.load(Ordering::Acquire) != 0 {
                std::thread::yield_now();
                spins += 1;
                if spins > 100_000 {
                    break;
                }
            }

            if let Err(e) = self
                .poll
                .poll(&mut events, Some(self.shared.config.purge_interval))
            {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                log::error!("Writer poll failed: {e}");
                break;
            }

            for event in events.iter() {
                let token = event.token();
                if token == WAKE_TOKEN {
                    continue;
                }
                let connection = self.inner.registered.lock().get(&token).cloned();
                if let Some(connection) = connection {
                    self.drive(&connection);
                }
            }

            if last_purge.elapsed() >= self.shared.config.purge_interval {
                self.purge();
                last_purge = Instant::now();
            }
        }
    }

    fn drive(&self, connection: &Arc<Connection>) {
        match drain(&self.shared, connection) {
            DrainOutcome::Emptied => {
                self.handle().deregister(connection);
            }
            DrainOutcome::Pending => {}
            DrainOutcome::Error(e) => {
                log::warn!("write error on {:?}: {e}", connection.token());
                self.handle().deregister(connection);
                self.shared.close_connection(connection);
            }
        }
    }

    /// Scan every write-registered connection for a head response that has
    /// sat unflushed for longer than `purge_interval` and close it
    /// (`spec.md` §4.4 "Purge").
    fn purge(&self) {
        let snapshot: Vec<Arc<Connection>> =
            self.inner.registered.lock().values().cloned().collect();

        for connection in snapshot {
            let stalled = connection
                .responses
                .lock()
                .front_mut()
                .map(|front| front.enqueued_at.elapsed() >= self.shared.config.purge_interval)
                .unwrap_or(false);

            if stalled {
                log::warn!("purging stalled connection {:?}", connection.token());
                self.handle().deregister(&connection);
                self.shared.close_connection(&connection);
            }
        }
    }

    fn handle(&self) -> WriterHandle {
        WriterHandle {
            inner: self.inner.clone(),
        }
    }
}
