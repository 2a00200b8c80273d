use crate::jsonrpc::{JsonRpcError, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};

/// Errors a method engine may return from a handler.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EngineError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A handler-defined JSON-RPC error, passed through unchanged.
    #[error("{message} ({code})")]
    Rpc { code: i32, message: String },

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn code(&self) -> i32 {
        match self {
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::Rpc { code, .. } => *code,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    /// Convert into a wire error object. Internal faults are reported with
    /// the generic message; their detail goes to the logs only.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            Self::MethodNotFound(method) => JsonRpcError::method_not_found(method),
            Self::InvalidParams(msg) => JsonRpcError::invalid_params(msg.clone()),
            Self::Rpc { code, message } => JsonRpcError::new(*code, message.clone()),
            Self::Internal(_) => JsonRpcError::internal_error(),
        }
    }
}
