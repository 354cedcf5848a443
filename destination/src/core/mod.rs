//! Core application infrastructure

mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod shutdown;

pub use app::CoreApp;
pub use cli::CliConfig;
pub use config::{AppConfig, Http2Params, ServerConfig};
pub use shutdown::ShutdownService;
