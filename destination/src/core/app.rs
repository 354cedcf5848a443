//! Core application

use std::sync::Arc;

use anyhow::Result;

use crate::api::{ApiServer, DestinationApi};
use crate::core::cli;
use crate::core::config::AppConfig;
use crate::core::constants::{APP_LOG_TARGET, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::discovery::dispatch::StreamCounters;
use crate::discovery::index::ServiceIndex;
use crate::discovery::topic::TopicRegistry;
use crate::profiles::ProfileRegistry;

/// Holds the controller's shared state: the discovery registries the
/// informer layer publishes into, and the services the gRPC facade
/// reads from.
pub struct CoreApp {
    pub config: AppConfig,
    pub shutdown: ShutdownService,
    pub registry: Arc<TopicRegistry>,
    pub index: Arc<ServiceIndex>,
    pub profiles: Arc<ProfileRegistry>,
    pub counters: Arc<StreamCounters>,
}

impl CoreApp {
    /// Run the controller with CLI argument parsing.
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Destination controller starting");

        let cli_config = cli::parse();
        let config = AppConfig::load(&cli_config)?;
        let app = Self::init(config);

        app.shutdown.install_signal_handlers();
        Self::start_server(app).await
    }

    /// Build the application state from a resolved configuration.
    pub fn init(config: AppConfig) -> Self {
        Self {
            config,
            shutdown: ShutdownService::new(),
            registry: Arc::new(TopicRegistry::new()),
            index: Arc::new(ServiceIndex::new()),
            profiles: Arc::new(ProfileRegistry::new()),
            counters: StreamCounters::new(),
        }
    }

    async fn start_server(app: CoreApp) -> Result<()> {
        let api = DestinationApi::new(
            app.config.clone(),
            Arc::clone(&app.registry),
            Arc::clone(&app.index),
            Arc::clone(&app.profiles),
            Arc::clone(&app.counters),
        );
        let server = ApiServer::new(&app.config.server.host, app.config.server.port, api)?;

        tracing::info!(
            addr = %server.addr(),
            cluster_domain = %app.config.cluster_domain,
            "Destination controller listening"
        );

        server.start(app.shutdown.subscribe()).await?;
        app.shutdown.shutdown().await;
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{APP_LOG_TARGET}=info");

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_builds_empty_registries() {
        let app = CoreApp::init(AppConfig::default());
        assert!(app.registry.is_empty());
        assert!(!app.shutdown.is_triggered());
    }
}
