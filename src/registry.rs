//! `ConnectionRegistry` — the live-connection set used by the idle sweep
//! (`spec.md` §3, §4.1).
//!
//! Grounded in the teacher's `Slab<Arc<Mutex<Connection<S>>>>` field on
//! `Listener`, keyed by the same `mio::Token` the socket is registered under.

use std::sync::Arc;
use std::time::Duration;

use mio::Token;
use parking_lot::Mutex;
use rand::Rng;
use slab::Slab;

use crate::connection::Connection;

/// Ordered collection of live connections, indexed by `mio::Token`.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Slab<Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot and build the `Connection` with the `Token` it was
    /// assigned, the way the teacher's `Listener::accept` uses
    /// `Slab::vacant_entry` to hand the token to `Connection::new` before the
    /// slot is actually filled.
    pub fn insert_with(&self, build: impl FnOnce(Token) -> Connection) -> Arc<Connection> {
        let mut inner = self.inner.lock();
        let entry = inner.vacant_entry();
        let token = Token(entry.key());
        let connection = Arc::new(build(token));
        entry.insert(connection.clone());
        connection
    }

    pub fn get(&self, token: Token) -> Option<Arc<Connection>> {
        self.inner.lock().get(token.0).cloned()
    }

    pub fn remove(&self, token: Token) -> Option<Arc<Connection>> {
        let mut inner = self.inner.lock();
        if inner.contains(token.0) {
            Some(inner.remove(token.0))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick a random contiguous range of the registry and return any
    /// connection in it that is idle and has no outstanding RPCs, up to
    /// `max_evictions` (`spec.md` §4.1). Callers are responsible for
    /// deregistering the socket and calling `remove` for each result.
    pub fn sweep_idle(
        &self,
        now_ms: i64,
        max_idle: Duration,
        max_evictions: usize,
    ) -> Vec<Arc<Connection>> {
        let max_idle_ms = max_idle.as_millis() as i64;
        let mut evicted = Vec::new();

        let inner = self.inner.lock();
        let capacity = inner.capacity();
        if capacity == 0 {
            return evicted;
        }

        let start = rand::thread_rng().gen_range(0..capacity);
        // A contiguous scan of up to the whole registry, starting at a
        // random offset, satisfying "pick a random contiguous range" without
        // a second pass to pick an independent end point.
        for offset in 0..capacity {
            if evicted.len() >= max_evictions {
                break;
            }
            let idx = (start + offset) % capacity;
            if let Some(conn) = inner.get(idx) {
                if conn.outstanding() == 0 && now_ms - conn.last_contact_ms() > max_idle_ms {
                    evicted.push(conn.clone());
                }
            }
        }

        evicted
    }
}
