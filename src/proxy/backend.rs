// src/proxy/backend.rs
use crate::health::{probe_with, Connector, TcpConnector};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

/// One upstream origin the balancer can route to.
///
/// `alive` and `in_flight` are the only mutable fields and are only reachable
/// through the accessors below.
#[derive(Debug)]
pub struct Backend {
    /// `host:port`, the identity used by [`BackendPool::lookup`](super::BackendPool::lookup).
    pub id: String,
    pub url: Url,

    // Runtime state
    alive: AtomicBool,
    in_flight: AtomicUsize,
}

impl Backend {
    /// Backends start alive; the health checker corrects that on its first tick.
    pub fn new(url: Url) -> Self {
        let id = Self::identity(&url);

        Self {
            id,
            url,
            alive: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// `host:port` of an origin url, with the scheme's default port filled in.
    pub fn identity(url: &Url) -> String {
        format!(
            "{}:{}",
            url.host_str().unwrap_or("unknown"),
            url.port_or_known_default().unwrap_or(80)
        )
    }

    /// `host:port` to dial for health probes.
    pub fn authority(&self) -> &str {
        &self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Returns the previous value.
    pub fn set_alive(&self, alive: bool) -> bool {
        self.alive.swap(alive, Ordering::AcqRel)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn inc_conn(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Saturates at zero.
    pub fn dec_conn(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Counts one in-flight request until the guard is dropped.
    pub fn connection_guard(self: &Arc<Self>) -> ConnectionGuard {
        self.inc_conn();
        ConnectionGuard {
            backend: self.clone(),
        }
    }

    /// Single time-bounded TCP connect. Updates liveness and returns it.
    pub async fn probe(&self, timeout: Duration) -> bool {
        self.probe_with(&TcpConnector, timeout).await
    }

    pub async fn probe_with(&self, connector: &dyn Connector, timeout: Duration) -> bool {
        match probe_with(connector, self.authority(), timeout).await {
            Ok(()) => {
                self.set_alive(true);
                info!(backend = %self.url, "backend is alive");
                true
            }
            Err(e) => {
                self.set_alive(false);
                info!(backend = %self.url, error = %e, "backend is down");
                false
            }
        }
    }
}

/// Decrements the backend's in-flight counter on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl Deref for ConnectionGuard {
    type Target = Arc<Backend>;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.dec_conn();
    }
}
