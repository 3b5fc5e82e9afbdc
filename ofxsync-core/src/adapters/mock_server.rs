//! Mock OFX server for testing
//!
//! A minimal HTTP/1.1 server on a random local port. Every request gets the
//! configured status and body, and is recorded so tests can inspect exactly
//! what the client sent.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Mock OFX server for testing
pub struct MockOfxServer {
    port: u16,
    running: Arc<AtomicBool>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

/// What the server answers with
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub status: u16,
    /// Raw response bytes, not necessarily ASCII
    pub body: Vec<u8>,
    /// Delay in milliseconds before responding
    pub delay_ms: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            status: 200,
            body: Vec::new(),
            delay_ms: 0,
        }
    }
}

/// A request as received
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Header names lower-cased
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl MockOfxServer {
    /// Start a new mock server on a random available port
    pub fn start(config: MockConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let running = Arc::new(AtomicBool::new(true));
        let requests = Arc::new(Mutex::new(Vec::new()));

        // Non-blocking so the accept loop can notice shutdown
        listener.set_nonblocking(true)?;

        let running_clone = running.clone();
        let requests_clone = requests.clone();
        let thread_handle = thread::spawn(move || {
            while running_clone.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let cfg = config.clone();
                        let requests = requests_clone.clone();
                        thread::spawn(move || handle_connection(stream, &cfg, &requests));
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            port,
            running,
            requests,
            thread_handle: Some(thread_handle),
        })
    }

    /// Get the base URL for this mock server
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/ofx", self.port)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockOfxServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_connection(
    mut stream: TcpStream,
    config: &MockConfig,
    requests: &Mutex<Vec<RecordedRequest>>,
) {
    let _ = stream.set_nonblocking(false);
    let Some(request) = read_request(&mut stream) else {
        return;
    };
    if let Ok(mut requests) = requests.lock() {
        requests.push(request);
    }

    if config.delay_ms > 0 {
        thread::sleep(Duration::from_millis(config.delay_ms));
    }

    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/x-ofx\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n",
        config.status,
        if config.status < 400 { "OK" } else { "Error" },
        config.body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&config.body);
    let _ = stream.flush();
}

/// Read headers, then exactly Content-Length bytes of body
fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut data = Vec::new();
    let mut buffer = [0; 4096];

    let header_end = loop {
        let n = stream.read(&mut buffer).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buffer[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    while data.len() < header_end + content_length {
        let n = stream.read(&mut buffer).ok()?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..n]);
    }

    let body_end = data.len().min(header_end + content_length);
    Some(RecordedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&data[header_end..body_end]).to_string(),
    })
}
