//! Handler Pool (`spec.md` §4.3).
//!
//! Grounded in the teacher's `Worker::run` (`src/worker.rs`): a fixed set of
//! threads blocking-receiving work off a channel and driving it to
//! completion one item at a time. The teacher's workers share a connection
//! behind a `Mutex` and read/parse/write inline; here the Reader has already
//! done the parsing and the Writer owns the socket, so a Handler's only
//! shared-state touch is the Call Queue pop and the final handoff to the
//! `WriterHandle`.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Instant;

use crate::call::{Call, CallQueue};
use crate::compression;
use crate::dispatch::Dispatcher;
use crate::error::ApplicationError;
use crate::shared::Shared;
use crate::wire::{self, ProfilingRecord};
use crate::writer::WriterHandle;

/// Fixed-size pool of daemon worker threads running the application
/// dispatcher for one Call at a time (`spec.md` §4.3).
pub struct HandlerPool {
    threads: Vec<std::thread::JoinHandle<()>>,
}

impl HandlerPool {
    /// Spawn `shared.config.handler_count` workers, each looping
    /// `call_queue.take()` until the queue is closed (i.e. the server is
    /// stopping and every producer has been dropped).
    pub fn spawn(shared: Arc<Shared>, writer: WriterHandle) -> Self {
        let count = shared.config.handler_count;
        let mut threads = Vec::with_capacity(count);
        for index in 0..count {
            let shared = shared.clone();
            let writer = writer.clone();
            let thread = std::thread::Builder::new()
                .name(format!("hrpc-handler-{index}"))
                .spawn(move || run(&shared, &writer))
                .expect("failed to spawn handler thread");
            threads.push(thread);
        }
        Self { threads }
    }

    /// Block until every handler thread has exited. Handlers exit once
    /// `CallQueue::take` returns `None`, which happens once the Reader side
    /// has stopped enqueueing and the queue drains (`spec.md` §4.5).
    pub fn join(self) {
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}

const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(250);

fn run(shared: &Arc<Shared>, writer: &WriterHandle) {
    while shared.is_running() {
        if let Some(call) = take(&shared.call_queue) {
            handle_one(shared, writer, call);
        }
    }
    // Drain whatever is still queued rather than dropping in-flight work on
    // the floor the instant `stop()` is called.
    while let Some(call) = shared.call_queue.take_timeout(std::time::Duration::from_millis(1)) {
        handle_one(shared, writer, call);
    }
}

fn take(queue: &CallQueue) -> Option<Call> {
    queue.take_timeout(POLL_INTERVAL)
}

fn handle_one(shared: &Arc<Shared>, writer: &WriterHandle, mut call: Call) {
    let Some(connection) = call.connection() else {
        // The connection was already torn down and dropped from the
        // registry; nothing was ever billed to the Throttler for this call,
        // so there is nothing to refund.
        return;
    };

    if connection.is_closed() {
        // Doomed-write race (`spec.md` §9, second Open Question): discard
        // without serializing or billing the Throttler.
        connection.decrement_outstanding();
        return;
    }

    let queued_for = call.received_at.elapsed();
    let identity = connection.identity();
    let remote_addr = connection.remote_addr();
    let request = std::mem::replace(&mut call.request, Box::new(()));
    let ctx = call.context(remote_addr, identity, shared.config.max_response_bytes);

    // A response-compression tag the server doesn't implement is reported
    // as an ordinary application error rather than attempted and silently
    // downgraded (`spec.md` §7's non-retryable-error category).
    let dispatch_started = Instant::now();
    let outcome = if let wire::Compression::Unsupported(tag) = call.tx_compression {
        Err(ApplicationError::unsupported_compression(tag))
    } else {
        shared.dispatcher.handle(&ctx, request)
    };
    let wall = dispatch_started.elapsed();

    let profiling = call.profile_requested.then(|| ProfilingRecord {
        wall_micros: wall.as_micros() as u64,
        queue_micros: queued_for.as_micros() as u64,
    });

    let frame = match encode_frame(shared.dispatcher.as_ref(), &call, outcome, profiling) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!(
                "failed to encode reply for call {} on {:?}: {e}",
                call.id,
                connection.token()
            );
            shared.close_connection(&connection);
            connection.decrement_outstanding();
            return;
        }
    };

    if connection.is_closed() {
        connection.decrement_outstanding();
        return;
    }

    let size = frame.len() as u64;
    shared.throttler.increase(size);
    call.serve_started_at = Some(Instant::now());
    writer.enqueue(shared, &connection, frame);
}

/// Build the reply frame bytes for one call, per the layout in `spec.md`
/// §4.3.
fn encode_frame(
    dispatcher: &dyn Dispatcher,
    call: &Call,
    outcome: Result<Box<dyn std::any::Any + Send>, ApplicationError>,
    profiling: Option<ProfilingRecord>,
) -> std::io::Result<Vec<u8>> {
    // An unimplemented compression tag can never actually be used to
    // compress the reply; fall back to NONE for the frame itself once the
    // unsupported-compression error above has already been produced.
    let tx_compression = match call.tx_compression {
        wire::Compression::Unsupported(_) => wire::Compression::None,
        other => other,
    };

    let mut frame = Vec::new();
    wire::write_call_id(&mut frame, call.id)?;

    frame.write_all(&[outcome.is_err() as u8])?;
    if call.version >= 4 {
        wire::write_utf(&mut frame, tx_compression.name())?;
    }

    let mut body = Vec::new();
    match outcome {
        Ok(response) => {
            dispatcher
                .encode_response(response.as_ref(), &mut body)
                .map_err(|e| {
                    std::io::Error::new(e.kind(), format!("encode_response failed: {e}"))
                })?;
            if call.version >= 4 {
                let profiled = profiling.is_some();
                body.write_all(&[profiled as u8])?;
                if let Some(record) = profiling {
                    record.encode(&mut body)?;
                }
            }
        }
        Err(app_err) => {
            wire::write_utf(&mut body, &app_err.class)?;
            wire::write_utf(&mut body, &app_err.message)?;
        }
    }

    // A compression failure here must not fall back to writing the
    // uncompressed body: the frame header above has already committed to
    // naming `tx_compression` (e.g. "GZ"), so silently substituting raw
    // bytes would hand the client a frame it can't correctly decode
    // (`spec.md` §7 treats this as the transient-I/O-error category, not an
    // application error on the call — the reply frame's own header is
    // already corrupt, so there is no well-formed frame left to send).
    let compressed = compression::compress(tx_compression, &body).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("failed to compress reply for call {}: {e}", call.id),
        )
    })?;
    frame.write_all(&compressed)?;

    // Length-prefixed on the wire symmetrically with the request side
    // (`spec.md` §6's table only states this explicitly for requests; see
    // `DESIGN.md` for why a response needs the same delimiter to be
    // parseable at all).
    let mut out = Vec::with_capacity(4 + frame.len());
    wire::write_length_prefix(&mut out, frame.len() as u32)?;
    out.write_all(&frame)?;

    Ok(out)
}
