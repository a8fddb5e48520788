// src/health/mod.rs
mod checker;
mod probe;

pub use checker::HealthChecker;
pub use probe::{probe_tcp, probe_with, Connector, ProbeError, TcpConnector};
