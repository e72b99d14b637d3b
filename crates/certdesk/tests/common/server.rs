//! Minimal HTTP/1.1 server for exercising the REST client and push channel.
//!
//! Routes are matched on method and path (query ignored). Every connection
//! serves one request and is closed, so no keep-alive handling is needed.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// A request as seen by the server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path including the query string.
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is not JSON")
    }
}

enum Responder {
    Json { status: u16, body: String },
    /// Each connection takes the next queued stream.
    Sse(Vec<mpsc::UnboundedReceiver<String>>),
}

type Routes = Arc<Mutex<HashMap<(String, String), Responder>>>;

pub struct MockServer {
    addr: SocketAddr,
    routes: Routes,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// Sending side of one SSE connection. Dropping it closes the stream.
pub struct SseFeed {
    tx: mpsc::UnboundedSender<String>,
}

impl SseFeed {
    pub fn send_raw(&self, chunk: &str) {
        let _ = self.tx.send(chunk.to_string());
    }

    pub fn send_event(&self, event: &str, data: &str) {
        self.send_raw(&format!("event: {}\ndata: {}\n\n", event, data));
    }
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Routes = Arc::default();
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();

        let (routes_task, requests_task) = (routes.clone(), requests.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = routes_task.clone();
                let requests = requests_task.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, routes, requests).await;
                });
            }
        });

        Self {
            addr,
            routes,
            requests,
        }
    }

    /// Base URL to use as `apiBaseUrl`.
    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn events_url(&self) -> String {
        format!("http://{}/api/events", self.addr)
    }

    pub fn json(&self, method: &str, path: &str, status: u16, body: serde_json::Value) {
        self.routes.lock().unwrap().insert(
            (method.to_string(), path.to_string()),
            Responder::Json {
                status,
                body: body.to_string(),
            },
        );
    }

    /// Queues one SSE connection on `GET /api/events`.
    pub fn sse_stream(&self) -> SseFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = self.routes.lock().unwrap();
        let key = ("GET".to_string(), "/api/events".to_string());
        match routes.get_mut(&key) {
            Some(Responder::Sse(queue)) => queue.push(rx),
            _ => {
                routes.insert(key, Responder::Sse(vec![rx]));
            }
        }
        SseFeed { tx }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path() == path)
            .collect()
    }

    /// Waits until `count` requests to `path` have been received.
    pub async fn wait_for_requests(&self, path: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.requests_to(path).len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {} requests to {}", count, path));
    }
}

async fn serve(
    mut stream: TcpStream,
    routes: Routes,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let request = read_request(&mut stream).await?;
    let key = (request.method.clone(), request.path().to_string());
    requests.lock().unwrap().push(request);

    enum Reply {
        Json(u16, String),
        Sse(mpsc::UnboundedReceiver<String>),
        NotFound,
    }

    let reply = {
        let mut routes = routes.lock().unwrap();
        match routes.get_mut(&key) {
            Some(Responder::Json { status, body }) => Reply::Json(*status, body.clone()),
            Some(Responder::Sse(queue)) if !queue.is_empty() => Reply::Sse(queue.remove(0)),
            _ => Reply::NotFound,
        }
    };

    match reply {
        Reply::Json(status, body) => write_json(&mut stream, status, &body).await,
        Reply::NotFound => write_json(&mut stream, 404, r#"{"message":"Not found"}"#).await,
        Reply::Sse(mut chunks) => {
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
                )
                .await?;
            stream.flush().await?;
            while let Some(chunk) = chunks.recv().await {
                stream.write_all(chunk.as_bytes()).await?;
                stream.flush().await?;
            }
            stream.shutdown().await
        }
    }
}

async fn write_json(stream: &mut TcpStream, status: u16, body: &str) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason(status),
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find(&buffer, b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let mut body = buffer[head_end + 4..].to_vec();
    if let Some(length) = headers.get("content-length").and_then(|v| v.parse::<usize>().ok()) {
        while body.len() < length {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
    } else if headers
        .get("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        while !body.ends_with(b"0\r\n\r\n") {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
    }

    Ok(RecordedRequest {
        method,
        target,
        headers,
        body,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
