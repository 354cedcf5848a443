//! Proxy-facing API

pub mod authority;
pub mod context;
mod grpc;
mod server;

pub use authority::{Authority, parse_authority};
pub use context::{ContextToken, parse_context_token};
pub use grpc::ApiServer;
pub use server::DestinationApi;
