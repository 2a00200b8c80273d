//! Message dispatcher.
//!
//! Transport-agnostic: takes a decoded message, runs it against the engine,
//! and returns the reply (if any). Adapters decide whether the reply goes
//! back inline or onto a session's stream.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use switchyard_core::engine::MethodEngine;
use switchyard_core::errors::EngineError;
use switchyard_core::ids::SessionId;
use switchyard_core::jsonrpc::{JsonRpcError, JsonRpcMessage};

use crate::config::LEGACY_PROTOCOL_VERSION;
use crate::metrics::TransportMetrics;
use crate::negotiate::Rejection;
use crate::registry::SessionRegistry;

pub struct Dispatcher {
    engine: Arc<dyn MethodEngine>,
    protocol_version: String,
    metrics: Arc<TransportMetrics>,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn MethodEngine>,
        protocol_version: impl Into<String>,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            engine,
            protocol_version: protocol_version.into(),
            metrics,
        }
    }

    /// Decode a submitted body into a single message.
    pub fn decode(body: &[u8]) -> Result<JsonRpcMessage, Rejection> {
        JsonRpcMessage::parse(body).map_err(Rejection::bad_message)
    }

    /// Run one message. Requests yield exactly one response carrying the
    /// request id; notifications and client responses yield nothing.
    pub async fn dispatch(&self, message: JsonRpcMessage) -> Option<JsonRpcMessage> {
        self.metrics.message_dispatched();
        match message {
            JsonRpcMessage::Request { id, method, params } => {
                tracing::debug!(request_id = %id, method = %method, "Dispatching request");
                let outcome = self.invoke(&method, params).await;
                Some(JsonRpcMessage::Response {
                    id: Some(id),
                    outcome,
                })
            }
            JsonRpcMessage::Notification { method, params } => {
                tracing::debug!(method = %method, "Dispatching notification");
                if let Err(e) = self.invoke(&method, params).await {
                    tracing::debug!(method = %method, code = e.code, "Notification handler failed");
                }
                None
            }
            JsonRpcMessage::Response { id, .. } => {
                tracing::debug!(request_id = ?id, "Ignoring client response");
                None
            }
        }
    }

    async fn invoke(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.unwrap_or_else(|| json!({}));
        match method {
            "initialize" => Ok(self.initialize_result(&params)),
            "ping" => Ok(json!({})),
            _ => {
                let call = AssertUnwindSafe(self.engine.handle(method, params)).catch_unwind();
                match call.await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => {
                        if let EngineError::Internal(detail) = &e {
                            tracing::warn!(method = %method, error = %detail, "Handler failed");
                        }
                        Err(e.to_rpc_error())
                    }
                    Err(_) => {
                        tracing::error!(method = %method, "Handler panicked");
                        Err(JsonRpcError::internal_error())
                    }
                }
            }
        }
    }

    /// Capability advertisement. Echoes the client's requested revision when
    /// it is one we speak, otherwise offers ours.
    fn initialize_result(&self, params: &Value) -> Value {
        let requested = params.get("protocolVersion").and_then(Value::as_str);
        let version = match requested {
            Some(v) if v == self.protocol_version || v == LEGACY_PROTOCOL_VERSION => v,
            _ => self.protocol_version.as_str(),
        };
        json!({
            "protocolVersion": version,
            "capabilities": self.engine.capabilities(),
            "serverInfo": self.engine.server_info(),
        })
    }

    /// Push a reply onto a session's stream. Resolves the session afresh so a
    /// reply never reaches a torn-down session; such replies are dropped.
    pub fn deliver(
        &self,
        registry: &SessionRegistry,
        session_id: &SessionId,
        reply: &JsonRpcMessage,
    ) -> bool {
        let Some(session) = registry.lookup(session_id) else {
            tracing::debug!(
                session_id = %session_id,
                request_id = ?reply.id(),
                "Session gone, dropping reply"
            );
            self.metrics.reply_dropped();
            return false;
        };
        match session.writer().write(reply) {
            Ok(()) => {
                self.metrics.reply_delivered();
                true
            }
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Dropping reply");
                self.metrics.reply_dropped();
                false
            }
        }
    }

    /// Dispatch in a detached task and deliver any reply to the session's
    /// stream when the handler completes.
    pub fn spawn_delivery(
        self: &Arc<Self>,
        registry: Arc<SessionRegistry>,
        session_id: SessionId,
        message: JsonRpcMessage,
    ) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(reply) = dispatcher.dispatch(message).await {
                dispatcher.deliver(&registry, &session_id, &reply);
            }
        })
    }
}
