// src/server/handler.rs
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::Service;

use crate::proxy::Dispatcher;

/// tower `Service` in front of the dispatcher. One clone per connection,
/// carrying that connection's peer address.
#[derive(Clone)]
pub struct RequestHandler {
    dispatcher: Arc<Dispatcher>,
    peer: Option<SocketAddr>,
}

impl RequestHandler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            peer: None,
        }
    }

    pub fn for_peer(&self, peer: SocketAddr) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            peer: Some(peer),
        }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        let peer = self.peer;
        Box::pin(async move { Ok(dispatcher.handle(req, peer).await) })
    }
}
