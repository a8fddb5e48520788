//
// src/proxy/mod.rs
//
mod backend;
mod context;
mod dispatcher;
mod forward;
mod pool;

pub use backend::{Backend, ConnectionGuard};
pub use context::RoutingContext;
pub use dispatcher::{DispatchError, Dispatcher};
pub use forward::{
    strip_hop_by_hop, BodyError, ForwardError, ForwardRequest, Forwarder, HttpForwarder,
    DEFAULT_MAX_BODY_BYTES,
};
pub use pool::BackendPool;
