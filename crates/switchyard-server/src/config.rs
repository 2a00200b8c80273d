use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Protocol revision required on the unified endpoint.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

/// Revision spoken by legacy event-stream clients. Accepted during
/// `initialize` so those clients get their own revision echoed back.
pub const LEGACY_PROTOCOL_VERSION: &str = "2024-11-05";

/// How replies to requests on an existing unified session are delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplyMode {
    /// In the body of the POST that carried the request.
    #[default]
    Inline,
    /// On the session's open event stream, falling back to inline when no
    /// stream is attached.
    Stream,
}

impl FromStr for ReplyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "stream" => Ok(Self::Stream),
            other => Err(format!("unknown reply mode: {other}")),
        }
    }
}

impl fmt::Display for ReplyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => f.write_str("inline"),
            Self::Stream => f.write_str("stream"),
        }
    }
}

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Legacy stream-open path (GET).
    pub legacy_sse_path: String,
    /// Legacy submit path (POST, `?sessionId=`).
    pub legacy_message_path: String,
    /// Unified endpoint path (GET/POST/DELETE).
    pub unified_path: String,
    pub protocol_version: String,
    pub reply_mode: ReplyMode,
    /// Outbound records buffered per session before new ones are dropped.
    pub max_send_queue: usize,
    /// Keep-alive comment interval on open streams. 0 disables.
    pub keep_alive_secs: u64,
    /// Sessions without inbound activity for this long are closed. 0 disables.
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            legacy_sse_path: "/sse".to_string(),
            legacy_message_path: "/messages".to_string(),
            unified_path: "/mcp".to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            reply_mode: ReplyMode::Inline,
            max_send_queue: 256,
            keep_alive_secs: 15,
            idle_timeout_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_secs > 0).then(|| Duration::from_secs(self.keep_alive_secs))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Check paths are absolute and distinct, and the queue can hold the
    /// announcement record.
    pub fn validate(&self) -> Result<(), String> {
        let paths = [
            ("legacy_sse_path", &self.legacy_sse_path),
            ("legacy_message_path", &self.legacy_message_path),
            ("unified_path", &self.unified_path),
            ("/health", &"/health".to_string()),
        ];
        for (name, path) in &paths {
            if !path.starts_with('/') {
                return Err(format!("{name} must start with '/': {path}"));
            }
        }
        for (i, (a_name, a)) in paths.iter().enumerate() {
            for (b_name, b) in &paths[i + 1..] {
                if a == b {
                    return Err(format!("{a_name} and {b_name} share the path {a}"));
                }
            }
        }
        if self.max_send_queue == 0 {
            return Err("max_send_queue must be at least 1".into());
        }
        if self.protocol_version.trim().is_empty() {
            return Err("protocol_version must not be empty".into());
        }
        Ok(())
    }
}
