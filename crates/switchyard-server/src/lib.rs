pub mod config;
pub mod dispatcher;
pub mod legacy;
pub mod lifecycle;
pub mod metrics;
pub mod negotiate;
pub mod registry;
pub mod server;
pub mod unified;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use config::{ReplyMode, ServerConfig};
pub use registry::{Session, SessionRegistry, Variant};
pub use server::{build_router, start, AppState, ServerError, ServerHandle};
