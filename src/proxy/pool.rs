// src/proxy/pool.rs
use super::backend::Backend;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

/// Ordered, fixed-after-startup set of backends plus the round-robin cursor.
///
/// Backends are added through `&mut self` only, so once the pool is wrapped
/// in an `Arc` and shared with the dispatcher and health checker its
/// membership cannot change.
#[derive(Debug, Default)]
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    cursor: AtomicU64,
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_urls<I>(urls: I) -> Self
    where
        I: IntoIterator<Item = Url>,
    {
        let mut pool = Self::new();
        for url in urls {
            pool.add(Arc::new(Backend::new(url)));
        }
        pool
    }

    pub fn add(&mut self, backend: Arc<Backend>) {
        tracing::info!(backend = %backend.url, "Added backend");
        self.backends.push(backend);
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn alive_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_alive()).count()
    }

    /// Advance the cursor, then scan every backend once starting at
    /// `cursor % len` and return the first alive one.
    pub fn select_round_robin(&self) -> Option<Arc<Backend>> {
        let len = self.backends.len();
        if len == 0 {
            return None;
        }

        let next = self.cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let start = (next % len as u64) as usize;

        (0..len)
            .map(|offset| &self.backends[(start + offset) % len])
            .find(|backend| backend.is_alive())
            .cloned()
    }

    /// Backend with the *highest* in-flight count, first one on ties.
    ///
    /// This is the observed behaviour of the balancer this engine replaces and
    /// is kept as-is; liveness is not consulted either.
    pub fn select_least_conns(&self) -> Option<Arc<Backend>> {
        let mut selected = self.backends.first()?;
        for backend in &self.backends[1..] {
            if backend.in_flight() > selected.in_flight() {
                selected = backend;
            }
        }
        Some(selected.clone())
    }

    /// Find a backend by `host:port` identity.
    pub fn lookup(&self, url: &Url) -> Option<Arc<Backend>> {
        self.lookup_id(&Backend::identity(url))
    }

    pub fn lookup_id(&self, id: &str) -> Option<Arc<Backend>> {
        self.backends.iter().find(|b| b.id == id).cloned()
    }
}
