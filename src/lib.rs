#![deny(missing_docs, rust_2018_idioms, unused_imports)]

//! `hrpc` is a length-prefixed, request/response binary RPC server built on
//! a small, bounded pool of OS threads plus one `mio` readiness selector per
//! I/O direction.
//!
//! Applications implement [`Dispatcher`] to decode requests, run business
//! logic, and encode responses, then drive the server with:
//!
//! ```no_run
//! use std::sync::Arc;
//! use hrpc::{Server, ServerConfig};
//! # use hrpc::{CallContext, Dispatcher, ApplicationError};
//! # use std::any::Any;
//! # use std::io::{self, Read, Write};
//! # struct Echo;
//! # impl Dispatcher for Echo {
//! #     fn decode_request(&self, r: &mut dyn Read) -> io::Result<Box<dyn Any + Send>> {
//! #         let mut s = String::new();
//! #         r.read_to_string(&mut s)?;
//! #         Ok(Box::new(s))
//! #     }
//! #     fn handle(&self, _ctx: &CallContext<'_>, req: Box<dyn Any + Send>) -> Result<Box<dyn Any + Send>, ApplicationError> {
//! #         Ok(req)
//! #     }
//! #     fn encode_response(&self, resp: &(dyn Any + Send), w: &mut dyn Write) -> io::Result<()> {
//! #         w.write_all(resp.downcast_ref::<String>().unwrap().as_bytes())
//! #     }
//! # }
//!
//! let config = ServerConfig::builder().port(0).build();
//! let server = Server::builder(Arc::new(Echo)).config(config).build().unwrap();
//! server.start();
//! // ... accept traffic at server.local_addr() ...
//! server.stop();
//! server.join();
//! ```
//!
//! See `spec.md`/`SPEC_FULL.md` in the repository for the full protocol and
//! component design this crate implements.

mod call;
mod compression;
mod config;
mod connection;
mod dispatch;
mod error;
mod handler;
mod pool;
mod reader;
mod registry;
mod shared;
/// Global response-byte backpressure counter (`spec.md` §3, §4.4).
///
/// Exposed publicly (rather than kept `pub(crate)`) so a host that embeds
/// its own transport in front of the same byte-accounting discipline —
/// or this crate's own benchmarks — can drive it directly.
pub mod throttler;
/// Wire constants and frame-field encodings (`spec.md` §6), exposed so a
/// from-scratch client implementation can speak the protocol without going
/// through this crate's [`Dispatcher`] abstraction.
pub mod wire;
mod writer;

pub use call::CallContext;
pub use config::{ServerConfig, ServerConfigBuilder};
pub use dispatch::Dispatcher;
pub use error::{ApplicationError, BindError, Error};
pub use throttler::Throttler;
pub use wire::{Compression, ProfilingRecord};

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mio::Poll;
use parking_lot::Mutex;

use handler::HandlerPool;
use reader::{IoLoop, ReaderHandle};
use shared::Shared;
use writer::{Writer, WriterHandle};

/// Lifecycle states named in `spec.md` §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Constructed,
    Running,
    Stopping,
    Stopped,
}

/// What to do when the host process is recovering from resource exhaustion
/// (`spec.md` §4.5, §7). Rust does not deliver a catchable OOM exception the
/// way the reference implementation's host runtime does; this hook exists
/// for a caller that detects memory pressure some other way (a cgroup
/// notification, an allocator hook, a periodic `/proc` check) and wants the
/// server's own recovery policy applied.
pub trait OomHandler: Send + Sync {
    /// Decide how the server should react to detected resource exhaustion.
    fn on_exhaustion(&self) -> OomAction;
}

/// Action requested by an [`OomHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OomAction {
    /// Log, sleep briefly, force an idle sweep, and keep running.
    Continue,
    /// Stop the server.
    Exit,
}

/// Builder for [`Server`]. Binds the listening socket eagerly so a
/// configured port of `0` can be read back via [`Server::local_addr`] before
/// [`Server::start`] is ever called.
pub struct ServerBuilder {
    config: ServerConfig,
    dispatcher: Arc<dyn Dispatcher>,
    oom_handler: Option<Arc<dyn OomHandler>>,
}

impl ServerBuilder {
    /// Start building a server around the given application [`Dispatcher`],
    /// using the default [`ServerConfig`].
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            config: ServerConfig::builder().build(),
            dispatcher,
            oom_handler: None,
        }
    }

    /// Override the default configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a resource-exhaustion recovery hook (`spec.md` §4.5).
    pub fn oom_handler(mut self, handler: Arc<dyn OomHandler>) -> Self {
        self.oom_handler = Some(handler);
        self
    }

    /// Bind the listening socket and build a [`Server`] in the
    /// `constructed` lifecycle state. Does not start any thread.
    pub fn build(self) -> Result<Server, Error> {
        let bind_addr = SocketAddr::new(self.config.bind_addr, self.config.port);
        let (listener, local_addr) = reader::bind(bind_addr, self.config.listen_backlog)?;

        let poll = Poll::new().map_err(Error::Io)?;
        let read_registry = poll.registry().try_clone().map_err(Error::Io)?;

        let shared = Arc::new(Shared::new(self.config, self.dispatcher, read_registry));
        let (io_loop, reader_handle) = IoLoop::new(listener, poll, shared.clone());
        let (writer, writer_handle) = Writer::new(shared.clone());

        Ok(Server {
            shared,
            local_addr,
            state: Mutex::new(LifecycleState::Constructed),
            io_loop: Mutex::new(Some(io_loop)),
            reader_handle,
            writer: Mutex::new(Some(writer)),
            writer_handle,
            io_thread: Mutex::new(None),
            writer_thread: Mutex::new(None),
            handlers: Mutex::new(None),
            oom_handler: self.oom_handler,
        })
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The RPC server. Construct with [`Server::builder`], drive its lifecycle
/// with [`Server::start`], [`Server::stop`], and [`Server::join`]
/// (`spec.md` §4.5: `constructed` → `running` → `stopping` → `stopped`).
pub struct Server {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    state: Mutex<LifecycleState>,
    io_loop: Mutex<Option<IoLoop>>,
    reader_handle: ReaderHandle,
    writer: Mutex<Option<Writer>>,
    writer_handle: WriterHandle,
    io_thread: Mutex<Option<JoinHandle<()>>>,
    writer_thread: Mutex<Option<JoinHandle<()>>>,
    handlers: Mutex<Option<HandlerPool>>,
    oom_handler: Option<Arc<dyn OomHandler>>,
}

impl Server {
    /// Start building a server around the given application [`Dispatcher`].
    pub fn builder(dispatcher: Arc<dyn Dispatcher>) -> ServerBuilder {
        ServerBuilder::new(dispatcher)
    }

    /// The address actually bound. Differs from the configured port when
    /// `0` was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the Writer, then the combined Acceptor/Reader loop, then the
    /// Handler pool (`spec.md` §4.5's documented spawn order). Panics if
    /// called more than once.
    pub fn start(&self) {
        let mut state = self.state.lock();
        assert_eq!(
            *state,
            LifecycleState::Constructed,
            "Server::start called more than once"
        );
        *state = LifecycleState::Running;
        drop(state);

        let writer = self
            .writer
            .lock()
            .take()
            .expect("writer already taken by a previous start()");
        *self.writer_thread.lock() = Some(
            std::thread::Builder::new()
                .name("hrpc-writer".into())
                .spawn(move || writer.run())
                .expect("failed to spawn writer thread"),
        );

        let io_loop = self
            .io_loop
            .lock()
            .take()
            .expect("I/O loop already taken by a previous start()");
        *self.io_thread.lock() = Some(
            std::thread::Builder::new()
                .name("hrpc-io".into())
                .spawn(move || io_loop.run())
                .expect("failed to spawn I/O loop thread"),
        );

        *self.handlers.lock() = Some(HandlerPool::spawn(
            self.shared.clone(),
            self.writer_handle.clone(),
        ));

        log::info!("hrpc server running on {}", self.local_addr);
    }

    /// Enter the `stopping` state: stop accepting new work, interrupt every
    /// worker, and close the listen socket and selectors. Outstanding
    /// responses are not guaranteed to drain (`spec.md` §4.5). Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if *state != LifecycleState::Running {
            return;
        }
        *state = LifecycleState::Stopping;
        drop(state);

        log::info!("hrpc server stopping");
        self.shared.stop();
        self.reader_handle.stop();
        self.writer_handle.stop();
    }

    /// Block until every spawned thread has exited. Safe to call once
    /// `stop()` has been called; does nothing useful if the server was
    /// never started.
    pub fn join(&self) {
        if let Some(thread) = self.io_thread.lock().take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.writer_thread.lock().take() {
            let _ = thread.join();
        }
        if let Some(handlers) = self.handlers.lock().take() {
            handlers.join();
        }
        *self.state.lock() = LifecycleState::Stopped;
        log::info!("hrpc server stopped");
    }

    /// Current number of connections in the registry. For tests and metrics.
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Current total bytes queued across all Response Queues. For tests and
    /// metrics (`spec.md` §8 "Throttler bound").
    pub fn queued_response_bytes(&self) -> u64 {
        self.shared.throttler.current()
    }

    /// Run the resource-exhaustion recovery policy described in `spec.md`
    /// §4.5 and §7: consult the installed [`OomHandler`] (defaulting to
    /// `Continue` if none is installed), then either sleep and force an
    /// idle sweep, or stop the server.
    pub fn handle_resource_exhaustion(&self) {
        let action = self
            .oom_handler
            .as_ref()
            .map(|handler| handler.on_exhaustion())
            .unwrap_or(OomAction::Continue);

        match action {
            OomAction::Continue => {
                log::error!("resource exhaustion recovery: sleeping before forcing an idle sweep");
                std::thread::sleep(Duration::from_secs(60));
                self.reader_handle.force_idle_sweep();
            }
            OomAction::Exit => {
                log::error!("resource exhaustion recovery: stopping the server");
                self.stop();
            }
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}
