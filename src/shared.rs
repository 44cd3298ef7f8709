//! State shared by every role: Acceptor, Reader, Handlers, and Writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::Registry;

use crate::call::CallQueue;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::registry::ConnectionRegistry;
use crate::throttler::Throttler;

/// Everything the four roles need a handle to. Built once in
/// `Server::builder().build()` and handed around as `Arc<Shared>`.
pub struct Shared {
    pub config: ServerConfig,
    pub registry: ConnectionRegistry,
    pub throttler: Throttler,
    pub call_queue: CallQueue,
    pub dispatcher: Arc<dyn Dispatcher>,
    /// A clone of the Reader's `Poll` registry, kept so the Writer (and
    /// Handlers closing a doomed connection) can deregister the read side of
    /// a socket without needing a handle to the Reader's thread.
    pub read_registry: Registry,
    /// Cleared by `Server::stop()`. Handler workers poll this between
    /// `CallQueue::take_timeout` calls since, unlike the Reader and Writer,
    /// they have no selector to wake them out of a blocking wait
    /// (`spec.md` §4.5).
    running: AtomicBool,
}

impl Shared {
    /// Build shared state with the running flag set.
    pub fn new(
        config: ServerConfig,
        dispatcher: Arc<dyn Dispatcher>,
        read_registry: Registry,
    ) -> Self {
        let call_queue = CallQueue::new(config.handler_count * config.per_handler_queue_limit);
        let throttler = Throttler::new(config.response_queues_max_bytes);
        Self {
            config,
            registry: ConnectionRegistry::new(),
            throttler,
            call_queue,
            dispatcher,
            read_registry,
            running: AtomicBool::new(true),
        }
    }

    /// Whether the server is still accepting Handler work. Cleared by `stop`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear the running flag so Handler workers drain out.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Tear down a connection: mark it closed (idempotent), refund any bytes
    /// still sitting in its Response Queue to the Throttler, deregister its
    /// read interest, and drop it from the registry.
    ///
    /// Safe to call from any role and more than once for the same
    /// connection — only the first caller does any work, resolving the
    /// "doomed write" race named in `spec.md` §9's second Open Question:
    /// a Call whose connection already closed is discarded without ever
    /// billing the Throttler in the first place.
    pub fn close_connection(&self, connection: &Arc<Connection>) {
        if !connection.mark_closed() {
            return;
        }

        let refund = connection.responses.lock().drain_remaining_bytes();
        if refund > 0 {
            self.throttler.decrease(refund);
        }

        connection.with_stream(|stream| {
            let _ = self.read_registry.deregister(stream);
        });

        self.registry.remove(connection.token());
        log::debug!(
            "connection {:?} ({}) closed",
            connection.token(),
            connection.remote_addr()
        );
    }
}
