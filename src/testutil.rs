//! Test doubles: a minimal HTTP/1.1 server and an in-memory segment fetcher.
//!
//! Serves static bodies keyed by request target (path plus query). HEAD gets
//! the same status and Content-Length without a body. Every request is
//! recorded so tests can assert on what was sent.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::core::error::FetchError;
use crate::core::model::Segment;
use crate::plugins::registry::SegmentFetcher;

#[derive(Debug, Clone)]
pub struct Route {
    pub target: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl Route {
    pub fn ok(target: &str, body: Vec<u8>) -> Self {
        Self { target: target.to_string(), status: 200, body }
    }

    pub fn status(target: &str, status: u16) -> Self {
        Self { target: target.to_string(), status, body: Vec::new() }
    }
}

#[derive(Default)]
struct Log {
    hits: HashMap<(String, String), usize>,
    last: HashMap<String, String>,
}

pub struct TestServer {
    base: String,
    log: Arc<Mutex<Log>>,
}

impl TestServer {
    /// Binds an ephemeral port and serves `routes` until the process exits.
    pub fn start(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let routes: Arc<HashMap<String, Route>> =
            Arc::new(routes.into_iter().map(|r| (r.target.clone(), r)).collect());
        let log = Arc::new(Mutex::new(Log::default()));
        let log2 = Arc::clone(&log);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let routes = Arc::clone(&routes);
                let log = Arc::clone(&log2);
                thread::spawn(move || handle(stream, &routes, &log));
            }
        });
        Self { base: format!("http://127.0.0.1:{}", port), log }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url(&self, target: &str) -> String {
        format!("{}{}", self.base, target)
    }

    pub fn hits(&self, method: &str, target: &str) -> usize {
        let log = self.log.lock().unwrap();
        log.hits.get(&(method.to_string(), target.to_string())).copied().unwrap_or(0)
    }

    pub fn last_request(&self, target: &str) -> Option<String> {
        self.log.lock().unwrap().last.get(target).cloned()
    }
}

fn handle(mut stream: TcpStream, routes: &HashMap<String, Route>, log: &Mutex<Log>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));

    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
        }
    }
    let request = String::from_utf8_lossy(&raw).to_string();
    let mut parts = request.lines().next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let target = parts.next().unwrap_or("").to_string();

    {
        let mut log = log.lock().unwrap();
        *log.hits.entry((method.clone(), target.clone())).or_default() += 1;
        log.last.insert(target.clone(), request.clone());
    }

    let (status, body) = match routes.get(&target) {
        Some(r) => (r.status, r.body.as_slice()),
        None => (404, &b""[..]),
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason(status),
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    if !method.eq_ignore_ascii_case("HEAD") {
        let _ = stream.write_all(body);
    }
    let _ = stream.flush();
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

/// In-memory `SegmentFetcher` keyed by URL, with per-URL delays and failures.
#[derive(Default)]
pub struct MemoryFetcher {
    bodies: HashMap<String, Bytes>,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fetches: Mutex<Vec<String>>,
    probes: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: impl Into<Bytes>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn probed(&self) -> Vec<String> {
        self.probes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SegmentFetcher for MemoryFetcher {
    fn name(&self) -> &'static str { "memory" }

    async fn fetch(&self, segment: &Segment) -> Result<Bytes, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.fetches.lock().unwrap().push(segment.url.clone());

        if let Some(d) = self.delays.get(&segment.url) {
            tokio::time::sleep(*d).await;
        }

        let result = if self.failing.contains(&segment.url) {
            Err(FetchError::Status { url: segment.url.clone(), status: StatusCode::INTERNAL_SERVER_ERROR })
        } else {
            self.bodies
                .get(&segment.url)
                .cloned()
                .ok_or_else(|| FetchError::Status { url: segment.url.clone(), status: StatusCode::NOT_FOUND })
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn content_length(&self, segment: &Segment) -> Result<u64, FetchError> {
        self.probes.lock().unwrap().push(segment.url.clone());
        self.bodies
            .get(&segment.url)
            .map(|b| b.len() as u64)
            .ok_or_else(|| FetchError::MissingLength { url: segment.url.clone() })
    }
}
