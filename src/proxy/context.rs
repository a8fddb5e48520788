// src/proxy/context.rs
use super::backend::Backend;
use std::sync::Arc;
use uuid::Uuid;

/// Request-scoped routing state, owned by the task handling one request.
#[derive(Debug)]
pub struct RoutingContext {
    pub request_id: Uuid,
    /// Failed attempts against the current binding.
    pub retry_count: u32,
    /// Forward attempts across every binding of this request.
    pub attempts: u32,
    backend: Option<Arc<Backend>>,
}

impl RoutingContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            retry_count: 0,
            attempts: 0,
            backend: None,
        }
    }

    /// Bind to a freshly selected backend; resets the retry count.
    pub fn bind(&mut self, backend: Arc<Backend>) {
        self.retry_count = 0;
        self.backend = Some(backend);
    }

    pub fn rebind(&mut self, backend: Arc<Backend>) {
        self.backend = Some(backend);
    }

    pub fn unbind(&mut self) -> Option<Arc<Backend>> {
        self.backend.take()
    }

    pub fn backend(&self) -> Option<&Arc<Backend>> {
        self.backend.as_ref()
    }
}

impl Default for RoutingContext {
    fn default() -> Self {
        Self::new()
    }
}
