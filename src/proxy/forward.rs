// src/proxy/forward.rs
// Transport side of the proxy: buffering the inbound request, rewriting it
// for a backend, and sending it upstream.

use super::backend::Backend;
use async_trait::async_trait;
use hyper::body::{Bytes, HttpBody};
use hyper::client::HttpConnector;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Body, Client, Method, Request, Response};
use hyper_tls::HttpsConnector;
use std::net::SocketAddr;
use std::time::Duration;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Largest inbound body buffered for replay unless configured otherwise.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("upstream transport error: {0}")]
    Transport(#[from] hyper::Error),

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),
}

/// Failure to buffer the inbound request body.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("failed to read request body: {0}")]
    Read(#[from] hyper::Error),

    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Sends a request that is already addressed to a backend.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ForwardError>;
}

/// hyper client over an HTTPS-capable connector, so both `http://` and
/// `https://` backends work.
pub struct HttpForwarder {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder().build::<_, Body>(HttpsConnector::new());
        Self { client, timeout }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ForwardError> {
        match tokio::time::timeout(self.timeout, self.client.request(req)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ForwardError::Timeout(self.timeout)),
        }
    }
}

/// An inbound request with its body buffered, so it can be replayed against
/// the same or another backend.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    method: Method,
    path_and_query: String,
    headers: HeaderMap,
    body: Bytes,
}

impl ForwardRequest {
    /// Buffers at most `max_body_bytes` of body; anything larger is refused
    /// before it is forwarded anywhere.
    pub async fn from_request(
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
        max_body_bytes: usize,
    ) -> Result<Self, BodyError> {
        let (parts, body) = req.into_parts();

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.map_or(false, |len| len > max_body_bytes as u64) {
            return Err(BodyError::TooLarge {
                limit: max_body_bytes,
            });
        }

        let body = read_limited(body, max_body_bytes).await?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        if let Some(addr) = client_addr {
            append_forwarded_for(&mut headers, addr);
        }

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        Ok(Self {
            method: parts.method,
            path_and_query,
            headers,
            body,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }

    /// Build the outbound request: scheme and authority come from the
    /// backend, the backend's base path is prefixed, `Host` is rewritten.
    pub fn to_request(&self, backend: &Backend) -> Result<Request<Body>, ForwardError> {
        let authority = origin_authority(backend);
        let base = backend.url.path().trim_end_matches('/');
        let uri = format!(
            "{}://{}{}{}",
            backend.url.scheme(),
            authority,
            base,
            self.path_and_query
        );

        let mut builder = Request::builder().method(self.method.clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers.clone();
            let host = HeaderValue::from_str(&authority)
                .map_err(|e| ForwardError::InvalidTarget(e.to_string()))?;
            headers.insert(header::HOST, host);
        }

        builder
            .body(Body::from(self.body.clone()))
            .map_err(|e| ForwardError::InvalidTarget(e.to_string()))
    }
}

async fn read_limited(mut body: Body, limit: usize) -> Result<Bytes, BodyError> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

/// `host[:port]` as written in the backend url.
fn origin_authority(backend: &Backend) -> String {
    let host = backend.url.host_str().unwrap_or_default();
    match backend.url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in &listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, addr: SocketAddr) {
    let ip = addr.ip().to_string();
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, ip),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn inbound(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::HOST, "lb.local:8080")
            .header(header::CONNECTION, "keep-alive, x-debug")
            .header("x-debug", "1")
            .header("x-forwarded-for", "203.0.113.7")
            .header("x-app", "kept")
            .body(Body::from("payload"))
            .unwrap()
    }

    #[tokio::test]
    async fn rewrites_target_and_host() {
        let req = ForwardRequest::from_request(
            inbound("/api/items?page=2"),
            Some("198.51.100.1:5555".parse().unwrap()),
            DEFAULT_MAX_BODY_BYTES,
        )
        .await
        .unwrap();

        let backend = Backend::new(Url::parse("http://10.0.0.5:3031").unwrap());
        let out = req.to_request(&backend).unwrap();

        assert_eq!(out.uri().to_string(), "http://10.0.0.5:3031/api/items?page=2");
        assert_eq!(out.headers()[header::HOST], "10.0.0.5:3031");
        assert_eq!(out.headers()["x-app"], "kept");
        assert_eq!(
            out.headers()["x-forwarded-for"],
            "203.0.113.7, 198.51.100.1"
        );
        assert!(out.headers().get(header::CONNECTION).is_none());
        assert!(out.headers().get("x-debug").is_none());

        let body = hyper::body::to_bytes(out.into_body()).await.unwrap();
        assert_eq!(&body[..], b"payload");
    }

    #[tokio::test]
    async fn body_can_be_replayed() {
        let req = ForwardRequest::from_request(inbound("/"), None, DEFAULT_MAX_BODY_BYTES)
            .await
            .unwrap();
        let a = Backend::new(Url::parse("https://a.internal").unwrap());
        let b = Backend::new(Url::parse("http://b.internal:81/base/").unwrap());

        let first = req.to_request(&a).unwrap();
        let second = req.to_request(&b).unwrap();
        assert_eq!(first.uri().to_string(), "https://a.internal/");
        assert_eq!(second.uri().to_string(), "http://b.internal:81/base/");
        assert_eq!(first.headers()[header::HOST], "a.internal");

        let first = hyper::body::to_bytes(first.into_body()).await.unwrap();
        let second = hyper::body::to_bytes(second.into_body()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn body_at_the_limit_is_buffered() {
        // "payload" is seven bytes
        let req = ForwardRequest::from_request(inbound("/"), None, 7).await.unwrap();
        let out = req
            .to_request(&Backend::new(Url::parse("http://a.internal").unwrap()))
            .unwrap();
        let body = hyper::body::to_bytes(out.into_body()).await.unwrap();
        assert_eq!(&body[..], b"payload");
    }

    #[tokio::test]
    async fn oversized_streamed_body_is_refused() {
        let (mut tx, body) = Body::channel();
        tokio::spawn(async move {
            let _ = tx.send_data(Bytes::from_static(b"abcd")).await;
            let _ = tx.send_data(Bytes::from_static(b"efgh")).await;
        });
        let req = Request::builder().uri("/").body(body).unwrap();

        let err = ForwardRequest::from_request(req, None, 6).await.unwrap_err();
        assert!(matches!(err, BodyError::TooLarge { limit: 6 }));
    }

    #[tokio::test]
    async fn oversized_content_length_is_refused_before_reading() {
        let (_tx, body) = Body::channel();
        let req = Request::builder()
            .uri("/")
            .header(header::CONTENT_LENGTH, "1048577")
            .body(body)
            .unwrap();

        let err = ForwardRequest::from_request(req, None, 1024 * 1024).await.unwrap_err();
        assert!(matches!(err, BodyError::TooLarge { .. }));
    }
}
