// tests/dispatch_tests.rs
// End-to-end: client -> load balancer listener -> mockito upstreams.

use failover_lb::config::RetryConfig;
use failover_lb::load_balancer::RoundRobinBalancer;
use failover_lb::proxy::{BackendPool, Dispatcher, HttpForwarder};
use failover_lb::server::{RequestHandler, ServerBuilder};
use hyper::{Body, Client, Request, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use url::Url;

struct Balancer {
    addr: SocketAddr,
    pool: Arc<BackendPool>,
    stop: Option<oneshot::Sender<()>>,
}

impl Balancer {
    async fn start(upstreams: &[String]) -> Self {
        let pool = Arc::new(BackendPool::from_urls(
            upstreams.iter().map(|u| Url::parse(u).unwrap()),
        ));
        let retry = RetryConfig {
            max_retries: 3,
            backoff_ms: 1,
            forward_timeout_secs: 5,
        };
        let dispatcher = Arc::new(Dispatcher::new(
            pool.clone(),
            Arc::new(RoundRobinBalancer::new()),
            Arc::new(HttpForwarder::new(Duration::from_secs(5))),
            retry,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();

        tokio::spawn(
            ServerBuilder::new(addr)
                .with_handler(RequestHandler::new(dispatcher))
                .serve_on(listener, async move {
                    let _ = stopped.await;
                }),
        );

        Self {
            addr,
            pool,
            stop: Some(stop),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Balancer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn dead_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

async fn body_string(body: Body) -> String {
    let bytes = hyper::body::to_bytes(body).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn forwards_to_a_live_upstream() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("GET", "/hello")
        .with_status(200)
        .with_header("x-upstream", "one")
        .with_body("hello")
        .expect(1)
        .create_async()
        .await;

    let lb = Balancer::start(&[upstream.url()]).await;
    let response = Client::new()
        .get(lb.url("/hello").parse().unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-upstream"], "one");
    assert_eq!(body_string(response.into_body()).await, "hello");
    mock.assert_async().await;
    assert_eq!(lb.pool.backends()[0].in_flight(), 0);
}

#[tokio::test]
async fn upstream_error_status_is_not_retried() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("GET", "/boom")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;

    let lb = Balancer::start(&[upstream.url()]).await;
    let response = Client::new().get(lb.url("/boom").parse().unwrap()).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    mock.assert_async().await;
    assert!(lb.pool.backends()[0].is_alive());
}

#[tokio::test]
async fn unreachable_upstream_fails_over_and_replays_body() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("POST", "/orders")
        .match_body("order-42")
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    // Round robin starts at index 1, so the dead upstream is tried first.
    let dead = dead_upstream().await;
    let lb = Balancer::start(&[upstream.url(), dead.clone()]).await;

    let request = Request::post(lb.url("/orders"))
        .body(Body::from("order-42"))
        .unwrap();
    let response = Client::new().request(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    mock.assert_async().await;

    let dead_backend = lb.pool.lookup(&Url::parse(&dead).unwrap()).unwrap();
    assert!(!dead_backend.is_alive());
    assert!(lb.pool.backends()[0].is_alive());
    assert_eq!(dead_backend.in_flight(), 0);
}

#[tokio::test]
async fn no_live_upstream_is_503() {
    let lb = Balancer::start(&[dead_upstream().await, dead_upstream().await]).await;

    let first = Client::new().get(lb.url("/").parse().unwrap()).await.unwrap();
    assert_eq!(first.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(first.into_body()).await, "");
    assert_eq!(lb.pool.alive_count(), 0);

    // Nothing alive any more: rejected without touching the upstreams.
    let second = Client::new().get(lb.url("/").parse().unwrap()).await.unwrap();
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
}
