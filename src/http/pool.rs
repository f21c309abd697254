//! Keep-alive connection pool
//!
//! Idle connections are parked per `Origin`. A connection is only ever
//! held by one exchange: checkout removes it from the pool and checkin
//! hands it back once its response body was read to the end.

use super::session::{Connection, Origin, PollEvents};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default idle connections kept per origin
pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 8;

/// Default idle connections kept overall
pub const DEFAULT_MAX_IDLE: usize = 64;

/// Default time an idle connection may sit in the pool
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

struct IdleConnection {
    conn: Box<dyn Connection>,
    since: Instant,
}

/// Bounded pool of reusable connections
pub struct ConnectionPool {
    idle: Mutex<HashMap<Origin, Vec<IdleConnection>>>,
    max_idle_per_host: usize,
    max_idle: usize,
    idle_timeout: Option<Duration>,
}

impl ConnectionPool {
    pub fn new(max_idle_per_host: usize, max_idle: usize) -> Self {
        ConnectionPool {
            idle: Mutex::new(HashMap::new()),
            max_idle_per_host,
            max_idle,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }

    /// Set how long a connection may stay idle; `None` keeps it forever
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Origin, Vec<IdleConnection>>> {
        // A panic while holding the lock cannot leave the map inconsistent
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take an idle connection for `origin`, most recently used first
    ///
    /// Connections that expired or that the peer already closed (readable
    /// while idle) are discarded.
    pub fn checkout(&self, origin: &Origin) -> Option<Box<dyn Connection>> {
        let mut stale = Vec::new();
        let found = {
            let mut idle = self.lock();
            let mut found = None;
            if let Some(list) = idle.get_mut(origin) {
                while let Some(entry) = list.pop() {
                    let expired = self
                        .idle_timeout
                        .map_or(false, |limit| entry.since.elapsed() >= limit);
                    let readable = entry
                        .conn
                        .poll(PollEvents::Read, Some(Duration::ZERO))
                        .unwrap_or(true);
                    if expired || readable {
                        stale.push(entry.conn);
                    } else {
                        found = Some(entry.conn);
                        break;
                    }
                }
                if list.is_empty() {
                    idle.remove(origin);
                }
            }
            found
        };

        for mut conn in stale {
            tracing::debug!("discarding stale pooled connection to {}", origin);
            let _ = conn.close();
        }
        if found.is_some() {
            tracing::debug!("reusing pooled connection to {}", origin);
        }
        found
    }

    /// Return a connection whose last exchange completed cleanly
    ///
    /// Closes it instead when the pool is at capacity.
    pub fn checkin(&self, origin: &Origin, mut conn: Box<dyn Connection>) {
        {
            let mut idle = self.lock();
            let total: usize = idle.values().map(Vec::len).sum();
            let list = idle.entry(origin.clone()).or_default();
            if list.len() < self.max_idle_per_host && total < self.max_idle {
                list.push(IdleConnection {
                    conn,
                    since: Instant::now(),
                });
                tracing::debug!("returned connection to {} to the pool", origin);
                return;
            }
            if list.is_empty() {
                idle.remove(origin);
            }
        }
        tracing::debug!("pool full, closing connection to {}", origin);
        let _ = conn.close();
    }

    /// Close every idle connection
    pub fn close_idle(&self) {
        let drained: Vec<IdleConnection> = self.lock().drain().flat_map(|(_, list)| list).collect();
        if !drained.is_empty() {
            tracing::debug!("closing {} idle connections", drained.len());
        }
        for mut entry in drained {
            let _ = entry.conn.close();
        }
    }

    /// Number of idle connections for `origin`
    pub fn idle_count(&self, origin: &Origin) -> usize {
        self.lock().get(origin).map_or(0, Vec::len)
    }

    /// Number of idle connections overall
    pub fn total_idle(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE_PER_HOST, DEFAULT_MAX_IDLE)
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.close_idle();
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("idle", &self.total_idle())
            .field("max_idle_per_host", &self.max_idle_per_host)
            .field("max_idle", &self.max_idle)
            .finish()
    }
}
