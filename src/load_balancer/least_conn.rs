// src/load_balancer/least_conn.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::{Backend, BackendPool};
use std::sync::Arc;

/// Connection-count policy. Note that it follows the pool's max-search and
/// does not skip dead backends.
#[derive(Debug, Default)]
pub struct LeastConnectionsBalancer;

impl LeastConnectionsBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnectionsBalancer {
    fn select_backend(&self, pool: &BackendPool) -> Option<Arc<Backend>> {
        pool.select_least_conns()
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}
