//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use gateway_client::http::{
    ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
use gateway_client::{ClientConfig, GatewayClient};

/// A structurally valid three-segment token.
pub fn jwt(tag: &str) -> String {
    format!("eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiJ7{tag}In0.c2lnbmF0dXJl")
}

/// Defaults pointed at `base_url`, with a short refresh deadline left at 5s.
pub fn test_config(base_url: &str) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.gateway.base_url = base_url.to_string();
    config.gateway.api_key = Some("test-api-key".to_string());
    config.auth.login_redirect_delay_ms = 10;
    config
}

/// Client over a real reqwest transport that ignores system proxies.
pub fn http_client(addr: SocketAddr) -> GatewayClient {
    let reqwest = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();
    GatewayClient::builder(test_config(&format!("http://{}", addr)))
        .transport(Arc::new(ReqwestTransport::with_client(reqwest)))
        .build()
        .unwrap()
}

/// What the scripted transport does with one request.
pub struct Reply {
    delay: Duration,
    result: Result<TransportResponse, TransportError>,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(TransportResponse {
                status,
                headers: HeaderMap::new(),
                body: Some(body),
            }),
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(TransportResponse {
                status,
                headers: HeaderMap::new(),
                body: None,
            }),
        }
    }

    pub fn fail(err: TransportError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(err),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        if let Ok(response) = &mut self.result {
            response
                .headers
                .insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        self
    }
}

type Handler = dyn Fn(&TransportRequest, usize) -> Reply + Send + Sync;

/// In-process transport: records every request and answers from a script.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    calls: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    /// `handler` receives each request and its zero-based call index.
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&TransportRequest, usize) -> Reply + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose path ends with `suffix`.
    pub fn requests_to(&self, suffix: &str) -> Vec<TransportRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.path().ends_with(suffix))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = (self.handler)(&request, index);
        self.requests.lock().unwrap().push(request);

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.result
    }
}

/// Start a programmable HTTP backend on an ephemeral port.
///
/// `f` receives the zero-based request index and returns `(status, body)`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);
    let counter = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                if !read_request_head(&mut socket).await {
                    return;
                }
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = f(index).await;
                let reason = reqwest::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");

                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

async fn read_request_head(socket: &mut tokio::net::TcpStream) -> bool {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    return true;
                }
            }
        }
    }
}
