//! Server configuration.
//!
//! Mirrors the teacher's `ListenerConfig` shape (a plain struct built by hand
//! rather than parsed from a file — config-file parsing is an out-of-scope
//! collaborator per `spec.md` §1) but covers every key named in `spec.md` §6.

use std::net::IpAddr;
use std::time::Duration;

/// Configuration consumed by the core. Construct with [`ServerConfig::builder`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub(crate) bind_addr: IpAddr,
    pub(crate) port: u16,
    pub(crate) tcp_nodelay: bool,
    pub(crate) so_keepalive: bool,
    pub(crate) listen_backlog: u32,
    pub(crate) handler_count: usize,
    pub(crate) per_handler_queue_limit: usize,
    pub(crate) idle_threshold: usize,
    pub(crate) max_evictions_per_sweep: usize,
    pub(crate) max_idle: Duration,
    pub(crate) sweep_interval: Duration,
    pub(crate) response_queues_max_bytes: u64,
    pub(crate) max_response_bytes: usize,
    pub(crate) deserialization_pool_max: usize,
    pub(crate) write_chunk_bytes: usize,
    pub(crate) purge_interval: Duration,
}

impl ServerConfig {
    /// Start building a configuration with every default from `spec.md` §6.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    bind_addr: IpAddr,
    port: u16,
    tcp_nodelay: bool,
    so_keepalive: bool,
    listen_backlog: u32,
    handler_count: usize,
    per_handler_queue_limit: usize,
    idle_threshold: usize,
    max_evictions_per_sweep: usize,
    max_idle: Duration,
    sweep_interval: Duration,
    response_queues_max_bytes: u64,
    max_response_bytes: usize,
    deserialization_pool_max: usize,
    write_chunk_bytes: usize,
    purge_interval: Duration,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: 0,
            tcp_nodelay: true,
            so_keepalive: true,
            listen_backlog: 128,
            handler_count: cpus,
            per_handler_queue_limit: 100,
            idle_threshold: 4000,
            max_evictions_per_sweep: 10,
            max_idle: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(10),
            response_queues_max_bytes: 1024 * 1024 * 1024,
            max_response_bytes: 64 * 1024 * 1024,
            deserialization_pool_max: cpus + 1,
            write_chunk_bytes: 8 * 1024,
            purge_interval: Duration::from_secs(15 * 60),
        }
    }
}

impl ServerConfigBuilder {
    /// Address to bind the listening socket to. Defaults to `0.0.0.0`.
    pub fn bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Port to bind. `0` selects an ephemeral port (read back via
    /// `Server::local_addr` after `start`).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Whether accepted sockets get `TCP_NODELAY`. Defaults to `true`.
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Whether accepted sockets get `SO_KEEPALIVE`. Defaults to `true`.
    pub fn so_keepalive(mut self, enabled: bool) -> Self {
        self.so_keepalive = enabled;
        self
    }

    /// Listen backlog passed to the OS. Defaults to 128.
    pub fn listen_backlog(mut self, backlog: u32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    /// Number of Handler worker threads. Defaults to the number of CPUs.
    pub fn handler_count(mut self, count: usize) -> Self {
        assert!(count > 0, "handler_count must be at least 1");
        self.handler_count = count;
        self
    }

    /// Per-handler Call Queue capacity; total capacity is `handler_count *
    /// per_handler_queue_limit`. Defaults to 100.
    pub fn per_handler_queue_limit(mut self, limit: usize) -> Self {
        self.per_handler_queue_limit = limit;
        self
    }

    /// Live-connection count above which the idle sweep activates. Defaults to 4000.
    pub fn idle_threshold(mut self, threshold: usize) -> Self {
        self.idle_threshold = threshold;
        self
    }

    /// Maximum connections evicted in a single sweep pass. Defaults to 10.
    pub fn max_evictions_per_sweep(mut self, max: usize) -> Self {
        self.max_evictions_per_sweep = max;
        self
    }

    /// Idle duration after which a connection with no outstanding RPCs becomes
    /// eligible for eviction. Defaults to 10 minutes.
    pub fn max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Minimum spacing between opportunistic idle sweeps. Defaults to 10s.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Ceiling on total bytes queued across all Response Queues. Defaults to 1 GiB.
    pub fn response_queues_max_bytes(mut self, max_bytes: u64) -> Self {
        self.response_queues_max_bytes = max_bytes;
        self
    }

    /// Global per-call response-size ceiling (`spec.md` §4.3, §7) consulted
    /// via `CallContext::charge_response_bytes` as application code
    /// accumulates result bytes. Defaults to 64 MiB.
    pub fn max_response_bytes(mut self, max_bytes: usize) -> Self {
        assert!(max_bytes > 0, "max_response_bytes must be at least 1");
        self.max_response_bytes = max_bytes;
        self
    }

    /// Maximum size of the Deserialization Pool. Defaults to `cpu_count + 1`.
    pub fn deserialization_pool_max(mut self, max: usize) -> Self {
        assert!(max > 0, "deserialization_pool_max must be at least 1");
        self.deserialization_pool_max = max;
        self
    }

    /// Chunk size used to split large non-blocking writes. Defaults to 8 KiB.
    pub fn write_chunk_bytes(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "write_chunk_bytes must be at least 1");
        self.write_chunk_bytes = bytes;
        self
    }

    /// Interval between Writer purge sweeps of stalled responses. Defaults to 15 minutes.
    pub fn purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    /// Finish building the configuration.
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind_addr,
            port: self.port,
            tcp_nodelay: self.tcp_nodelay,
            so_keepalive: self.so_keepalive,
            listen_backlog: self.listen_backlog,
            handler_count: self.handler_count,
            per_handler_queue_limit: self.per_handler_queue_limit,
            idle_threshold: self.idle_threshold,
            max_evictions_per_sweep: self.max_evictions_per_sweep,
            max_idle: self.max_idle,
            sweep_interval: self.sweep_interval,
            response_queues_max_bytes: self.response_queues_max_bytes,
            max_response_bytes: self.max_response_bytes,
            deserialization_pool_max: self.deserialization_pool_max,
            write_chunk_bytes: self.write_chunk_bytes,
            purge_interval: self.purge_interval,
        }
    }
}
