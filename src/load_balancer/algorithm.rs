// src/load_balancer/algorithm.rs
use crate::proxy::{Backend, BackendPool};
use std::sync::Arc;

/// Selection policy consulted by the dispatcher for every fresh binding.
pub trait LoadBalancer: Send + Sync {
    fn select_backend(&self, pool: &BackendPool) -> Option<Arc<Backend>>;

    fn name(&self) -> &'static str;
}
