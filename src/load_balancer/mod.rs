// src/load_balancer/mod.rs
mod algorithm;
mod least_conn;
mod round_robin;

pub use algorithm::LoadBalancer; // trait
pub use least_conn::LeastConnectionsBalancer;
pub use round_robin::RoundRobinBalancer;
pub use crate::config::SelectionPolicy;

use std::sync::Arc;

pub fn create_load_balancer(policy: SelectionPolicy) -> Arc<dyn LoadBalancer> {
    match policy {
        SelectionPolicy::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        SelectionPolicy::LeastConnections => {
            tracing::warn!(
                "least-connections routes to the busiest backend and ignores liveness"
            );
            Arc::new(LeastConnectionsBalancer::new())
        }
    }
}
