//! `Call` — one in-flight RPC request/response pair (`spec.md` §3).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use crate::connection::Connection;
use crate::error::ApplicationError;
use crate::wire::Compression;

/// A single in-flight RPC call, owned by the Call Queue until a Handler pops
/// it, then by the Handler during dispatch, then transferred onto its
/// Connection's Response Queue.
pub struct Call {
    /// Client-assigned call id. Unique only within its Connection.
    pub id: i32,
    /// Non-owning back-pointer to the owning Connection.
    pub connection: Weak<Connection>,
    /// When the Reader finished framing this call.
    pub received_at: Instant,
    /// When this call started sitting in a Response Queue. Set by the Writer
    /// enqueue path, not the Reader — see `SPEC_FULL.md` §9 for why this is
    /// kept distinct from `received_at` rather than reusing one timestamp.
    pub serve_started_at: Option<Instant>,
    /// Negotiated wire version for this call.
    pub version: u8,
    /// Compression the client used for the request body.
    pub rx_compression: Compression,
    /// Compression to use for the response body.
    pub tx_compression: Compression,
    /// Whether the client requested a profiling record on the reply.
    pub profile_requested: bool,
    /// Opaque tag, echoed into the `CallContext` given to the dispatcher.
    pub tag: Option<String>,
    /// The decoded request object, produced by `Dispatcher::decode_request`
    /// on the Reader/Deserialization-Pool thread that framed this call.
    pub request: Box<dyn std::any::Any + Send>,
    /// Running total of response bytes produced so far, checked against the
    /// per-call ceiling during handling (`spec.md` §4.3).
    pub partial_response_size: AtomicUsize,
    /// The fully serialized response frame body, set once the Handler finishes.
    pub response: Option<Vec<u8>>,
}

impl Call {
    /// Context passed to the application dispatcher for this call.
    /// `max_response_bytes` is the server-wide ceiling from `ServerConfig`
    /// (`spec.md` §4.3, §7) — every call is charged against the same limit,
    /// not a value each call site is free to pick.
    pub fn context(
        &self,
        remote_addr: SocketAddr,
        identity: Vec<u8>,
        max_response_bytes: usize,
    ) -> CallContext {
        CallContext {
            remote_addr,
            identity,
            tag: self.tag.clone(),
            version: self.version,
            profile_requested: self.profile_requested,
            partial_response_size: &self.partial_response_size,
            max_response_bytes,
        }
    }

    /// Upgrade the back-pointer, or `None` if the connection has already been
    /// dropped from the registry.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.upgrade()
    }
}

/// Explicit, non-thread-local handle given to `Dispatcher::handle` exposing
/// everything handler code needs about the call in flight (`spec.md` §9
/// Design Notes: "pass an explicit context value through the dispatcher
/// signature rather than relying on thread-local storage").
pub struct CallContext<'a> {
    /// Address of the connected client.
    pub remote_addr: SocketAddr,
    /// Opaque identity blob exchanged during the connection handshake.
    pub identity: Vec<u8>,
    /// Opaque tag attached to this call, if any.
    pub tag: Option<String>,
    /// Negotiated wire version.
    pub version: u8,
    /// Whether a profiling record was requested.
    pub profile_requested: bool,
    partial_response_size: &'a AtomicUsize,
    /// The server-wide response-size ceiling this call is charged against
    /// (`ServerConfig::max_response_bytes`).
    max_response_bytes: usize,
}

impl<'a> CallContext<'a> {
    /// Charge `additional_bytes` against the per-call response-size quota,
    /// rejecting once the server's configured `max_response_bytes` ceiling
    /// would be exceeded (`spec.md` §4.3). Application code that accumulates
    /// result bytes incrementally should call this as it goes rather than
    /// only once at the end.
    pub fn charge_response_bytes(&self, additional_bytes: usize) -> Result<(), ApplicationError> {
        let new_total = self
            .partial_response_size
            .fetch_add(additional_bytes, Ordering::Relaxed)
            + additional_bytes;
        if new_total > self.max_response_bytes {
            Err(ApplicationError::response_too_large(self.max_response_bytes))
        } else {
            Ok(())
        }
    }
}

/// Bounded, blocking FIFO of Calls awaiting a Handler. Capacity is
/// `handler_count * per_handler_queue_limit` (`spec.md` §3).
#[derive(Clone)]
pub struct CallQueue {
    sender: Sender<Call>,
    receiver: Receiver<Call>,
}

impl CallQueue {
    /// Create a queue with the given bounded capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self { sender, receiver }
    }

    /// Blocking enqueue. Blocks the calling (framing) thread when full —
    /// this is the designed TCP backpressure path (`spec.md` §4.2).
    pub fn put(&self, call: Call) {
        // A disconnected receiver only happens once every Handler has exited,
        // which only happens during shutdown; dropping the call is correct.
        let _ = self.sender.send(call);
    }

    /// Blocking dequeue, used by Handler workers.
    pub fn take(&self) -> Option<Call> {
        self.receiver.recv().ok()
    }

    /// Dequeue with a timeout, so Handler workers can periodically check the
    /// server's running flag instead of blocking forever (`spec.md` §4.5:
    /// `stop()` "interrupts all worker threads"). Returns `None` both on
    /// timeout and on disconnect; callers distinguish by checking the
    /// running flag themselves.
    pub fn take_timeout(&self, timeout: std::time::Duration) -> Option<Call> {
        self.receiver.recv_timeout(timeout).ok()
    }
}
