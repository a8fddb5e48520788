// src/health/checker.rs
use super::probe::{Connector, TcpConnector};
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::BackendPool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Periodically probes every backend of the pool.
pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: Arc<BackendPool>,
    metrics: Option<Arc<MetricsCollector>>,
    connector: Arc<dyn Connector>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        pool: Arc<BackendPool>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Self {
            config,
            pool,
            metrics,
            connector: Arc::new(TcpConnector),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Tick loop. The first round runs one interval after start.
    pub async fn start(self: Arc<Self>) {
        let period = self.config.interval();
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            "Healthcheck initialized with {:.1}s periodicity",
            period.as_secs_f64()
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_all_backends();
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Spawn one probe task per backend and return without waiting for them.
    pub fn check_all_backends(&self) -> Vec<JoinHandle<bool>> {
        debug!(backends = self.pool.len(), "Starting health check round");

        self.pool
            .backends()
            .iter()
            .cloned()
            .map(|backend| {
                let timeout = self.config.timeout();
                let metrics = self.metrics.clone();
                let connector = self.connector.clone();
                tokio::spawn(async move {
                    let alive = backend.probe_with(connector.as_ref(), timeout).await;
                    if let Some(metrics) = metrics {
                        metrics.update_backend_health(&backend.id, alive);
                    }
                    alive
                })
            })
            .collect()
    }
}
