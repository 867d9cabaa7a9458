//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use forward_proxy::config::{Protocol, ProxyConfig, ProxyEndpoint};
use forward_proxy::http::head::read_head;
use forward_proxy::net::AdmissionController;
use forward_proxy::observability::{AccessLogRecord, CollectingRecorder};
use forward_proxy::{ProxyRuntime, Shutdown};

/// A proxy running on an ephemeral port with an in-memory access log.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub recorder: CollectingRecorder,
    pub admission: AdmissionController,
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl TestProxy {
    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Trigger shutdown and wait for the runtime to drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("proxy did not drain in time")
            .expect("proxy task failed");
    }

    /// Wait until at least `count` access records were emitted.
    pub async fn wait_for_records(&self, count: usize) -> Vec<AccessLogRecord> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let records = self.recorder.records();
            if records.len() >= count {
                return records;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} access records, got {}",
                records.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Start a proxy with one aggregate endpoint on 127.0.0.1:0.
pub async fn start_proxy(configure: impl FnOnce(&mut ProxyConfig)) -> TestProxy {
    let mut config = ProxyConfig::default();
    config.log.log_dir = String::new();
    config.log.enable_console = false;
    config.listener.bind_host = "127.0.0.1".into();
    config.endpoints = vec![ProxyEndpoint::new(Protocol::Aggregate, [0])];
    configure(&mut config);

    let recorder = CollectingRecorder::new();
    let runtime = ProxyRuntime::bind(&config, Arc::new(recorder.clone()))
        .await
        .expect("proxy failed to bind");
    let (_, addr) = runtime.local_addrs()[0];
    let admission = runtime.admission().clone();
    let shutdown = runtime.shutdown_handle();
    let task = tokio::spawn(runtime.run_until(std::future::pending()));

    TestProxy {
        addr,
        recorder,
        admission,
        shutdown,
        task,
    }
}

/// HTTP client that sends every request through `proxy`.
pub fn proxied_client(proxy: SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{proxy}")).unwrap())
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Start an axum origin.
///
/// Routes: `GET /hello`, `POST /echo` (echoes the body), `GET /slow`
/// (answers after 500ms).
pub async fn start_axum_origin() -> SocketAddr {
    let app = Router::new()
        .route("/hello", get(|| async { "Hello from origin" }))
        .route("/echo", post(|body: String| async move { body }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "finally"
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Start a raw origin that reads one request head per connection and
/// answers with `response` verbatim.
pub async fn start_mock_origin(response: &'static str) -> SocketAddr {
    start_programmable_origin(move |_head| async move { response.to_string() }).await
}

/// Start a raw origin whose response is computed from the request head.
pub async fn start_programmable_origin<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = String> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                let Ok(Some(head)) = read_head(&mut reader, 64 * 1024).await else {
                    return;
                };
                let response = f(String::from_utf8_lossy(&head).into_owned()).await;
                let socket = reader.get_mut();
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a TCP origin that echoes every byte back.
pub async fn start_echo_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = socket.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// Start a TCP origin that writes `tick` every `interval` and never reads.
pub async fn start_ticker_origin(interval: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                while socket.write_all(b"tick").await.is_ok() {
                    tokio::time::sleep(interval).await;
                }
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

/// Send raw bytes to the proxy and read until it closes the connection.
pub async fn raw_exchange(proxy: SocketAddr, request: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}
