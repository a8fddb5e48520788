// src/load_balancer/round_robin.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::{Backend, BackendPool};
use std::sync::Arc;

/// Rotates through the pool's cursor, skipping dead backends.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer;

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select_backend(&self, pool: &BackendPool) -> Option<Arc<Backend>> {
        pool.select_round_robin()
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
