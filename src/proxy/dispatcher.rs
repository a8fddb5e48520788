// ────────────────────────────────
// src/proxy/dispatcher.rs
// Request entry point: select, forward, retry, fail over.
// ────────────────────────────────

use super::backend::Backend;
use super::context::RoutingContext;
use super::forward::{
    strip_hop_by_hop, BodyError, ForwardRequest, Forwarder, DEFAULT_MAX_BODY_BYTES,
};
use super::pool::BackendPool;
use crate::config::RetryConfig;
use crate::load_balancer::LoadBalancer;
use crate::metrics::MetricsCollector;
use hyper::{Body, Request, Response, StatusCode};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub struct Dispatcher {
    pool: Arc<BackendPool>,
    balancer: Arc<dyn LoadBalancer>,
    forwarder: Arc<dyn Forwarder>,
    retry: RetryConfig,
    max_body_bytes: usize,
    metrics: Option<Arc<MetricsCollector>>,
}

/// Outcome of serving one binding.
enum Binding {
    Served(Response<Body>),
    Exhausted,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<BackendPool>,
        balancer: Arc<dyn LoadBalancer>,
        forwarder: Arc<dyn Forwarder>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            pool,
            balancer,
            forwarder,
            retry,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            metrics: None,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    /// Serve one inbound request. Never fails: every error is turned into a
    /// response here.
    pub async fn handle(&self, req: Request<Body>, client_addr: Option<SocketAddr>) -> Response<Body> {
        let mut ctx = RoutingContext::new();

        let response = match ForwardRequest::from_request(req, client_addr, self.max_body_bytes).await {
            Ok(request) => match self.dispatch(&request, &mut ctx).await {
                Ok(response) => response,
                Err(e) => {
                    error!(
                        request_id = %ctx.request_id,
                        "Cant serve {} {}: {}",
                        request.method(),
                        request.path_and_query(),
                        e
                    );
                    e.into()
                }
            },
            Err(BodyError::TooLarge { limit }) => {
                warn!(request_id = %ctx.request_id, limit, "request body too large");
                DispatchError::PayloadTooLarge(limit).into()
            }
            Err(e) => {
                warn!(request_id = %ctx.request_id, error = %e, "failed to read request body");
                DispatchError::InvalidRequest(e.to_string()).into()
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_request(response.status().as_u16());
        }
        response
    }

    /// Bind to a backend, forward with retries, and re-select after each
    /// exhausted binding until a forward succeeds or nothing is left.
    pub async fn dispatch(
        &self,
        request: &ForwardRequest,
        ctx: &mut RoutingContext,
    ) -> Result<Response<Body>, DispatchError> {
        // Backends this request has already given up on. Only relevant for
        // policies that may hand back a dead backend.
        let mut exhausted: HashSet<String> = HashSet::new();

        loop {
            let backend = match self.balancer.select_backend(&self.pool) {
                Some(b) if b.is_alive() || !exhausted.contains(&b.id) => b,
                _ => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_no_backend();
                    }
                    return Err(DispatchError::NoBackendAvailable);
                }
            };

            info!(
                request_id = %ctx.request_id,
                backend = %backend.url,
                policy = self.balancer.name(),
                "Serving {} {}",
                request.method(),
                request.path_and_query()
            );
            ctx.bind(backend);

            match self.serve_binding(request, ctx).await? {
                Binding::Served(response) => return Ok(response),
                Binding::Exhausted => {
                    if let Some(dead) = ctx.unbind() {
                        dead.set_alive(false);
                        warn!(
                            request_id = %ctx.request_id,
                            backend = %dead.url,
                            attempts = ctx.attempts,
                            "Marked backend as down after exhausting retries"
                        );
                        if let Some(metrics) = &self.metrics {
                            metrics.record_failover(&dead.id);
                        }
                        exhausted.insert(dead.id.clone());
                    }
                }
            }
        }
    }

    /// Forward to the bound backend, retrying the same backend with a fixed
    /// backoff. The in-flight count is held for the whole binding.
    async fn serve_binding(
        &self,
        request: &ForwardRequest,
        ctx: &mut RoutingContext,
    ) -> Result<Binding, DispatchError> {
        let bound = ctx.backend().cloned().ok_or(DispatchError::NoBackendAvailable)?;
        let guard = bound.connection_guard();
        self.report_connections(&guard);

        let outcome = loop {
            let backend = ctx.backend().cloned().ok_or(DispatchError::NoBackendAvailable)?;
            ctx.attempts += 1;

            let result = match request.to_request(&backend) {
                Ok(outbound) => self.forwarder.forward(outbound).await,
                Err(e) => Err(e),
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_forward(&backend.id, result.is_ok());
            }

            match result {
                Ok(mut response) => {
                    strip_hop_by_hop(response.headers_mut());
                    break Binding::Served(response);
                }
                Err(e) if ctx.retry_count >= self.retry.max_retries => {
                    debug!(
                        request_id = %ctx.request_id,
                        backend = %backend.url,
                        retry = ctx.retry_count,
                        error = %e,
                        "forward failed, retries exhausted"
                    );
                    break Binding::Exhausted;
                }
                Err(e) => {
                    debug!(
                        request_id = %ctx.request_id,
                        backend = %backend.url,
                        retry = ctx.retry_count,
                        error = %e,
                        "forward failed, retrying in {:?}",
                        self.retry.backoff()
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry(&backend.id);
                    }

                    sleep(self.retry.backoff()).await;
                    ctx.retry_count += 1;

                    let again = self
                        .pool
                        .lookup_id(&backend.id)
                        .ok_or(DispatchError::NoBackendAvailable)?;
                    ctx.rebind(again);
                }
            }
        };

        drop(guard);
        self.report_connections(&bound);
        Ok(outcome)
    }

    fn report_connections(&self, backend: &Backend) {
        if let Some(metrics) = &self.metrics {
            metrics.update_backend_connections(&backend.id, backend.in_flight());
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No available alive servers")]
    NoBackendAvailable,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
}

impl From<DispatchError> for Response<Body> {
    fn from(err: DispatchError) -> Self {
        let status = match err {
            DispatchError::NoBackendAvailable => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        };

        let mut response = Response::new(Body::empty());
        *response.status_mut() = status;
        response
    }
}
