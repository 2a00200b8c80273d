pub mod engine;
pub mod errors;
pub mod ids;
pub mod jsonrpc;

pub use engine::{MethodEngine, ServerInfo, StaticEngine};
pub use errors::EngineError;
pub use ids::SessionId;
pub use jsonrpc::{JsonRpcError, JsonRpcMessage, RequestId};
