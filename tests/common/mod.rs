//! Shared utilities for relay integration tests.

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image_relay::relay::UpstreamTracker;
use image_relay::{HttpServer, RelayConfig, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A request as seen by a mock upstream.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// How a mock upstream frames its body.
#[derive(Debug, Clone)]
pub enum MockBody {
    /// Body with a matching `Content-Length`.
    Fixed(Vec<u8>),
    /// `total` bytes with chunked transfer encoding.
    Chunked { total: usize },
    /// Declares `Content-Length` but sends no body.
    DeclaredOnly(u64),
    /// Never answers.
    Hang,
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: MockBody,
}

impl MockResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self::status(200).with_body(MockBody::Fixed(body))
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: MockBody::Fixed(Vec::new()),
        }
    }

    pub fn with_body(mut self, body: MockBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// A running mock upstream that records every request.
pub struct MockUpstream {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockUpstream {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a mock upstream answering each request with `handler`.
pub async fn start_upstream<F>(handler: F) -> MockUpstream
where
    F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let recorded = requests.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let handler = handler.clone();
                    let recorded = recorded.clone();
                    tokio::spawn(async move {
                        serve_connection(socket, handler.as_ref(), &recorded).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockUpstream { addr, requests }
}

async fn serve_connection<F>(mut socket: TcpStream, handler: &F, recorded: &Mutex<Vec<RecordedRequest>>)
where
    F: Fn(&RecordedRequest) -> MockResponse,
{
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    let response = handler(&request);
    recorded.lock().unwrap().push(request);

    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, reason(response.status));
    for (name, value) in &response.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("Connection: close\r\n");

    match response.body {
        MockBody::Fixed(body) => {
            head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&body).await;
        }
        MockBody::Chunked { total } => {
            head.push_str("Transfer-Encoding: chunked\r\n\r\n");
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            let mut left = total;
            while left > 0 {
                let n = left.min(64 * 1024);
                let mut chunk = format!("{:x}\r\n", n).into_bytes();
                chunk.extend(std::iter::repeat(0x5A).take(n));
                chunk.extend_from_slice(b"\r\n");
                if socket.write_all(&chunk).await.is_err() {
                    return;
                }
                left -= n;
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
        }
        MockBody::DeclaredOnly(length) => {
            head.push_str(&format!("Content-Length: {}\r\n\r\n", length));
            let _ = socket.write_all(head.as_bytes()).await;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        MockBody::Hang => {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    }
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut tmp).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&tmp[..n]);
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.split("\r\n");
    let path = lines.next()?.split_whitespace().nth(1)?.to_string();
    let headers = lines
        .take_while(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    Some(RecordedRequest { path, headers })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Unknown",
    }
}

/// A running relay server.
pub struct RelayHarness {
    pub addr: SocketAddr,
    pub tracker: UpstreamTracker,
    shutdown: Shutdown,
}

impl RelayHarness {
    pub fn url(&self) -> String {
        format!("http://{}/image/proxy", self.addr)
    }

    /// Wait until every upstream attempt has been released.
    pub async fn wait_released(&self) {
        for _ in 0..50 {
            if self.tracker.active() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(self.tracker.active(), 0, "upstream connections leaked");
    }
}

impl Drop for RelayHarness {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start a relay that trusts 127.0.0.1 so it can reach mock upstreams.
pub async fn start_relay(configure: impl FnOnce(&mut RelayConfig)) -> RelayHarness {
    let mut config = RelayConfig::default();
    config.guard.trusted_addresses = vec![Ipv4Addr::LOCALHOST.into()];
    configure(&mut config);

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config);
    let tracker = server.tracker();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    RelayHarness {
        addr,
        tracker,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
