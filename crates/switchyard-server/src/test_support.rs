//! Helpers for the HTTP-level tests: a server on an ephemeral port, a test
//! engine with a gated method, and an event-stream reader.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use switchyard_core::engine::{MethodEngine, ServerInfo};
use switchyard_core::errors::EngineError;
use tokio::sync::Notify;

use crate::config::{ServerConfig, DEFAULT_PROTOCOL_VERSION};
use crate::negotiate::{PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER};
use crate::server::{start, ServerHandle};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestEngine {
    /// Released once per `slow` call.
    pub gate: Arc<Notify>,
}

#[async_trait]
impl MethodEngine for TestEngine {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        match method {
            "echo" => Ok(params),
            "slow" => {
                self.gate.notified().await;
                Ok(json!({"released": true}))
            }
            "explode" => panic!("handler bug"),
            "tools/list" => Ok(json!({"tools": []})),
            "notifications/initialized" => Ok(Value::Null),
            other => Err(EngineError::MethodNotFound(other.into())),
        }
    }

    fn capabilities(&self) -> Value {
        json!({"tools": {}})
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo::new("test-engine", "0.0.1")
    }
}

pub fn test_engine() -> Arc<dyn MethodEngine> {
    Arc::new(TestEngine {
        gate: Arc::new(Notify::new()),
    })
}

pub struct TestServer {
    pub handle: ServerHandle,
    pub gate: Arc<Notify>,
    pub client: reqwest::Client,
    base: String,
}

/// Start a server on an ephemeral port with `configure` applied to the
/// default config.
pub async fn spawn(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let mut config = ServerConfig {
        port: 0,
        ..Default::default()
    };
    configure(&mut config);

    let gate = Arc::new(Notify::new());
    let engine = Arc::new(TestEngine {
        gate: Arc::clone(&gate),
    });
    let handle = start(config, engine).await.unwrap();
    let base = format!("http://127.0.0.1:{}", handle.port);

    TestServer {
        handle,
        gate,
        client: reqwest::Client::new(),
        base,
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn open_legacy_stream(&self) -> reqwest::Response {
        let resp = self.client.get(self.url("/sse")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        resp
    }

    /// Open a legacy stream and read the announcement. Returns the reader and
    /// the announced submit URL (absolute).
    pub async fn legacy_session(&self) -> (EventReader, String) {
        let mut events = EventReader::new(self.open_legacy_stream().await);
        let announcement = events.next_record().await.unwrap();
        assert_eq!(announcement.event, "endpoint");
        let submit = self.url(&announcement.data);
        (events, submit)
    }

    pub async fn legacy_post(&self, submit_url: &str, body: Value) -> reqwest::Response {
        self.client
            .post(submit_url)
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    /// A unified request carrying the headers a well-behaved client sends.
    pub fn unified(
        &self,
        method: reqwest::Method,
        session: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, self.url("/mcp"))
            .header("accept", "application/json, text/event-stream")
            .header(PROTOCOL_VERSION_HEADER, DEFAULT_PROTOCOL_VERSION);
        if let Some(id) = session {
            builder = builder.header(SESSION_ID_HEADER, id);
        }
        builder
    }

    pub async fn unified_post(&self, session: Option<&str>, body: Value) -> reqwest::Response {
        self.unified(reqwest::Method::POST, session)
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    /// POST `initialize` without a session header; returns the new id.
    pub async fn unified_initialize(&self) -> String {
        let resp = self
            .unified_post(
                None,
                json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}}),
            )
            .await;
        assert_eq!(resp.status(), 200);
        session_id_of(&resp)
    }

    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.handle.state().metrics.snapshot()
    }

    /// Poll until the registry holds `expected` sessions.
    pub async fn wait_for_sessions(&self, expected: usize) {
        let registry = &self.handle.state().registry;
        let waited = tokio::time::timeout(Duration::from_secs(10), async {
            while registry.len() != expected {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "expected {expected} sessions, have {}",
            registry.len()
        );
    }
}

pub fn session_id_of(resp: &reqwest::Response) -> String {
    resp.headers()
        .get(SESSION_ID_HEADER)
        .expect("session header")
        .to_str()
        .unwrap()
        .to_string()
}

/// One decoded record from an event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub event: String,
    pub data: String,
}

impl Record {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.data).unwrap()
    }
}

/// Incremental reader over an event-stream response body. Comment-only
/// blocks (keep-alives) are skipped.
pub struct EventReader {
    body: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buf: String,
}

impl EventReader {
    pub fn new(resp: reqwest::Response) -> Self {
        Self {
            body: Box::pin(resp.bytes_stream()),
            buf: String::new(),
        }
    }

    /// Next record, or `None` once the server ends the stream. Panics if
    /// nothing arrives within the read timeout.
    pub async fn next_record(&mut self) -> Option<Record> {
        loop {
            if let Some(record) = self.take_buffered() {
                return Some(record);
            }
            let chunk = tokio::time::timeout(READ_TIMEOUT, self.body.next())
                .await
                .expect("timed out waiting for event");
            match chunk {
                Some(Ok(bytes)) => self.buf.push_str(&String::from_utf8_lossy(&bytes)),
                Some(Err(_)) | None => return None,
            }
        }
    }

    /// Whether the stream stays silent (apart from keep-alives) for `wait`.
    pub async fn quiet_for(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.next_record()).await.is_err()
    }

    fn take_buffered(&mut self) -> Option<Record> {
        loop {
            let end = self.buf.find("\n\n")?;
            let block: String = self.buf.drain(..end + 2).collect();

            let mut event = String::from("message");
            let mut data: Vec<&str> = Vec::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = v.trim_start().to_string();
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push(v.strip_prefix(' ').unwrap_or(v));
                }
            }
            if data.is_empty() {
                continue;
            }
            return Some(Record {
                event,
                data: data.join("\n"),
            });
        }
    }
}
