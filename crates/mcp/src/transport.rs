//! MCP transport implementations: stdio, streamable HTTP, and legacy SSE.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>;

/// Transports move JSON-RPC messages to and from one MCP server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for its response.
    ///
    /// A JSON-RPC error response is returned as `Err`.
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification; no response is awaited.
    async fn notify(&self, request: JsonRpcRequest) -> Result<()>;

    /// Close the connection.
    async fn close(&self) -> Result<()>;
}

fn check_error(response: JsonRpcResponse) -> Result<JsonRpcResponse> {
    if let Some(ref error) = response.error {
        bail!("JSON-RPC error {}: {}", error.code, error.message);
    }
    Ok(response)
}

async fn deliver(pending: &Pending, response: JsonRpcResponse) {
    let sender = pending.lock().await.remove(&response.id);
    match sender {
        Some(sender) => {
            let _ = sender.send(response);
        }
        None => trace!(id = ?response.id, "Dropping unsolicited MCP message"),
    }
}

// --- stdio ---

/// Spawns a subprocess and speaks newline-delimited JSON-RPC over its stdio.
pub struct StdioTransport {
    next_id: AtomicU64,
    pending: Pending,
    writer: Mutex<tokio::io::BufWriter<ChildStdin>>,
    child: Mutex<Child>,
}

impl StdioTransport {
    /// Spawn the server process.
    pub fn spawn(command: &str, args: &[String], env: &BTreeMap<String, String>) -> Result<Arc<Self>> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn MCP server: {command}"))?;

        let stdin = child.stdin.take().context("Failed to get stdin")?;
        let stdout = child.stdout.take().context("Failed to get stdout")?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = Arc::clone(&pending);
        let server = command.to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => match serde_json::from_str::<JsonRpcResponse>(line.trim()) {
                        Ok(response) => deliver(&reader_pending, response).await,
                        Err(_) => trace!(server = %server, line = %line.trim(), "Ignoring non-response line"),
                    },
                }
            }
            debug!(server = %server, "MCP server stdout closed");
            // Fail every waiter instead of leaving it hanging.
            reader_pending.lock().await.clear();
        });

        Ok(Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending,
            writer: Mutex::new(tokio::io::BufWriter::new(stdin)),
            child: Mutex::new(child),
        }))
    }

    async fn write(&self, request: &JsonRpcRequest) -> Result<()> {
        let json = serde_json::to_string(request)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        request.id = Some(id.clone());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if let Err(e) = self.write(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e.context("Failed to write to MCP server"));
        }

        let response = rx.await.context("MCP server closed the connection")?;
        check_error(response)
    }

    async fn notify(&self, mut request: JsonRpcRequest) -> Result<()> {
        request.id = None;
        self.write(&request).await
    }

    async fn close(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!(error = %e, "MCP server already exited");
        }
        Ok(())
    }
}

// --- streamable HTTP ---

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Posts each message to a single endpoint; replies come back as JSON or as
/// a short event stream.
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
    session: Mutex<Option<String>>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
            session: Mutex::new(None),
        })
    }

    async fn post(&self, request: &JsonRpcRequest) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(request);
        if let Some(session) = self.session.lock().await.as_ref() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to reach MCP server at {}", self.url))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session.lock().await = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("MCP server returned {status}: {body}");
        }
        Ok(response)
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        request.id = Some(id.clone());

        let response = self.post(&request).await?;
        let is_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));
        let body = response.text().await.context("Failed to read MCP response")?;

        let parsed = if is_stream {
            find_response_in_sse(&body, &id).context("No response in MCP event stream")?
        } else {
            serde_json::from_str(&body).context("Failed to parse MCP response")?
        };
        check_error(parsed)
    }

    async fn notify(&self, mut request: JsonRpcRequest) -> Result<()> {
        request.id = None;
        self.post(&request).await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            let result = self
                .client
                .delete(&self.url)
                .header(SESSION_HEADER, session)
                .send()
                .await;
            if let Err(e) = result {
                debug!(error = %e, "Failed to end MCP session");
            }
        }
        Ok(())
    }
}

/// Pick the response with `id` out of an event-stream body.
fn find_response_in_sse(body: &str, id: &RequestId) -> Option<JsonRpcResponse> {
    let mut parser = SseParser::default();
    let mut events = parser.push(body.as_bytes());
    events.extend(parser.push(b"\n\n"));
    events
        .into_iter()
        .filter_map(|event| serde_json::from_str::<JsonRpcResponse>(&event.data).ok())
        .find(|response| &response.id == id)
}

// --- legacy SSE ---

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Feed bytes; returns every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() || self.event.is_some() {
                    events.push(SseEvent {
                        event: self.event.take(),
                        data: std::mem::take(&mut self.data).join("\n"),
                    });
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        events
    }
}

/// Holds a GET event stream open for server messages and posts requests to
/// the endpoint the server announces.
pub struct SseTransport {
    endpoint: String,
    client: reqwest::Client,
    next_id: AtomicU64,
    pending: Pending,
    reader: JoinHandle<()>,
}

/// Aborts a task when dropped, unless defused.
struct AbortGuard(Option<tokio::task::AbortHandle>);

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if let Some(handle) = &self.0 {
            handle.abort();
        }
    }
}

impl SseTransport {
    /// Open the event stream and wait for the `endpoint` event.
    pub async fn connect(url: &str) -> Result<Arc<Self>> {
        let base = reqwest::Url::parse(url).with_context(|| format!("Invalid MCP SSE url: {url}"))?;
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(base.clone())
            .header("Accept", "text/event-stream")
            .send()
            .await
            .with_context(|| format!("Failed to reach MCP server at {url}"))?;
        if !response.status().is_success() {
            bail!("MCP server returned {}", response.status());
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = Arc::clone(&pending);
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let reader = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut parser = SseParser::default();
            let mut stream = response.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(error = %e, "MCP event stream failed");
                        break;
                    }
                };
                for event in parser.push(&bytes) {
                    match event.event.as_deref() {
                        Some("endpoint") => {
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(event.data);
                            }
                        }
                        _ => match serde_json::from_str::<JsonRpcResponse>(&event.data) {
                            Ok(response) => deliver(&reader_pending, response).await,
                            Err(_) => trace!(data = %event.data, "Ignoring non-response event"),
                        },
                    }
                }
            }
            reader_pending.lock().await.clear();
        });

        // Dropping this future (e.g. on an init timeout) stops the reader too
        let mut guard = AbortGuard(Some(reader.abort_handle()));
        let path = endpoint_rx
            .await
            .context("MCP event stream ended before announcing an endpoint")?;
        let endpoint = base
            .join(&path)
            .with_context(|| format!("Invalid MCP endpoint: {path}"))?
            .to_string();
        guard.0 = None;
        debug!(endpoint = %endpoint, "MCP SSE endpoint announced");

        Ok(Arc::new(Self {
            endpoint,
            client,
            next_id: AtomicU64::new(1),
            pending,
            reader,
        }))
    }

    async fn post(&self, request: &JsonRpcRequest) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .with_context(|| format!("Failed to post to {}", self.endpoint))?;
        if !response.status().is_success() {
            bail!("MCP server returned {}", response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        request.id = Some(id.clone());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if let Err(e) = self.post(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = rx.await.context("MCP event stream closed")?;
        check_error(response)
    }

    async fn notify(&self, mut request: JsonRpcRequest) -> Result<()> {
        request.id = None;
        self.post(&request).await
    }

    async fn close(&self) -> Result<()> {
        self.reader.abort();
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
