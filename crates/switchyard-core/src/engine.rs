//! The method-dispatch engine the transport layer routes to.
//!
//! The engine knows nothing about sessions or wire bindings. It receives a
//! method name and params and returns a result or an error.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EngineError;

/// Name and version advertised in the `initialize` result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl ServerInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Trait implemented by the method-dispatch engine.
#[async_trait]
pub trait MethodEngine: Send + Sync {
    /// Handle one method call. Also invoked for notifications, in which case
    /// the result is discarded.
    async fn handle(&self, method: &str, params: Value) -> Result<Value, EngineError>;

    /// Capability advertisement returned from `initialize`.
    fn capabilities(&self) -> Value;

    fn server_info(&self) -> ServerInfo;
}

/// Engine answering a fixed table of methods with canned results.
///
/// Notifications for any method are accepted.
pub struct StaticEngine {
    info: ServerInfo,
    capabilities: Value,
    methods: HashMap<String, Value>,
}

impl StaticEngine {
    pub fn new(info: ServerInfo) -> Self {
        Self {
            info,
            capabilities: serde_json::json!({}),
            methods: HashMap::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_method(mut self, method: impl Into<String>, result: Value) -> Self {
        self.methods.insert(method.into(), result);
        self
    }
}

#[async_trait]
impl MethodEngine for StaticEngine {
    async fn handle(&self, method: &str, _params: Value) -> Result<Value, EngineError> {
        if method.starts_with("notifications/") {
            return Ok(Value::Null);
        }
        self.methods
            .get(method)
            .cloned()
            .ok_or_else(|| EngineError::MethodNotFound(method.to_string()))
    }

    fn capabilities(&self) -> Value {
        self.capabilities.clone()
    }

    fn server_info(&self) -> ServerInfo {
        self.info.clone()
    }
}
