//! Shared test fixtures: a scriptable mock guest plus a minimal HTTP server
//! standing in for the one-shot transfer endpoints.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::vim::{GuestApi, GuestInfo, GuestProcess, TransferTicket, VimFault};

// ── MockApi ──────────────────────────────────────────────

#[derive(Default)]
pub struct MockState {
    pub info: GuestInfo,
    /// Guest paths that exist, mapped to their download tickets.
    pub files: HashMap<String, TransferTicket>,
    /// Forced faults per path for `delete_file` / `delete_directory`.
    pub delete_faults: HashMap<String, VimFault>,
    pub delete_dir_faults: HashMap<String, VimFault>,
    /// Base URL prepended to the guest path for PUT tickets, e.g.
    /// `http://*:8080` to exercise the wildcard-host rewrite.
    pub put_url_base: String,
    pub start_fault: Option<VimFault>,
    pub pid: i64,
    /// Returned unchanged on every `list_processes` call.
    pub processes: Vec<GuestProcess>,

    // Recorded calls
    pub started: Vec<(String, String)>,
    pub deleted: Vec<String>,
    pub deleted_dirs: Vec<(String, bool)>,
    pub temp_files: Vec<String>,
    pub poll_count: u32,
}

pub struct MockApi {
    pub state: Mutex<MockState>,
}

impl MockApi {
    pub fn new(state: MockState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn with_linux_guest() -> Self {
        Self::new(MockState {
            info: GuestInfo {
                guest_family: Some("linuxGuest".into()),
                guest_id: Some("ubuntu64Guest".into()),
            },
            pid: 4242,
            ..MockState::default()
        })
    }
}

impl GuestApi for MockApi {
    async fn guest_info(&self) -> Result<GuestInfo, VimFault> {
        Ok(self.state.lock().unwrap().info.clone())
    }

    async fn list_files(&self, path: &str) -> Result<(), VimFault> {
        let state = self.state.lock().unwrap();
        if state.files.contains_key(path) {
            Ok(())
        } else {
            Err(VimFault::new("FileNotFound", format!("{path} was not found")))
        }
    }

    async fn create_temp_file(&self, prefix: &str, suffix: &str) -> Result<String, VimFault> {
        let mut state = self.state.lock().unwrap();
        let path = format!("/tmp/{prefix}-{}{suffix}", state.temp_files.len() + 1);
        state.temp_files.push(path.clone());
        Ok(path)
    }

    async fn initiate_transfer_to_guest(
        &self,
        path: &str,
        _size: u64,
        _overwrite: bool,
    ) -> Result<String, VimFault> {
        let state = self.state.lock().unwrap();
        Ok(format!("{}{path}", state.put_url_base))
    }

    async fn initiate_transfer_from_guest(&self, path: &str) -> Result<TransferTicket, VimFault> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| VimFault::new("FileNotFound", format!("{path} was not found")))
    }

    async fn delete_file(&self, path: &str) -> Result<(), VimFault> {
        let mut state = self.state.lock().unwrap();
        if let Some(fault) = state.delete_faults.get(path) {
            return Err(fault.clone());
        }
        state.deleted.push(path.to_string());
        Ok(())
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> Result<(), VimFault> {
        let mut state = self.state.lock().unwrap();
        if let Some(fault) = state.delete_dir_faults.get(path) {
            return Err(fault.clone());
        }
        state.deleted_dirs.push((path.to_string(), recursive));
        Ok(())
    }

    async fn start_program(&self, program: &str, arguments: &str) -> Result<i64, VimFault> {
        let mut state = self.state.lock().unwrap();
        if let Some(fault) = state.start_fault.clone() {
            return Err(fault);
        }
        state.started.push((program.to_string(), arguments.to_string()));
        Ok(state.pid)
    }

    async fn list_processes(&self, _pids: &[i64]) -> Result<Vec<GuestProcess>, VimFault> {
        let mut state = self.state.lock().unwrap();
        state.poll_count += 1;
        Ok(state.processes.clone())
    }
}

// ── One-shot HTTP server ─────────────────────────────────

pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<Recorded>>>,
}

impl TestServer {
    /// Wildcard-host URL for a guest path, as the management plane would
    /// mint it (`http://*:<port>/<path>`).
    pub fn wildcard_url(&self, path: &str) -> String {
        format!("http://*:{}{path}", self.addr.port())
    }
}

/// Serve HTTP/1.1 on a random local port: GETs answer with the body mapped
/// for their path (404 otherwise), every other method answers 200 empty.
/// Each request is recorded.
pub async fn spawn_server(responses: HashMap<String, Vec<u8>>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = requests.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let responses = responses.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let n = match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = find_header_end(&buf) {
                        break pos;
                    }
                };

                let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let mut parts = head.split_whitespace();
                let method = parts.next().unwrap_or("").to_string();
                let path = parts.next().unwrap_or("").to_string();

                let content_length = head
                    .lines()
                    .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(str::trim).map(String::from))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);

                let mut body = buf[header_end + 4..].to_vec();
                while body.len() < content_length {
                    let n = match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    body.extend_from_slice(&chunk[..n]);
                }

                recorded.lock().unwrap().push(Recorded {
                    method: method.clone(),
                    path: path.clone(),
                    body,
                });

                let response = if method == "GET" {
                    match responses.get(&path) {
                        Some(body) => {
                            let mut r = format!(
                                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                                body.len()
                            )
                            .into_bytes();
                            r.extend_from_slice(body);
                            r
                        }
                        None => b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_vec(),
                    }
                } else {
                    b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_vec()
                };

                let _ = stream.write_all(&response).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    TestServer { addr, requests }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
