//! gRPC server bootstrap

use std::net::SocketAddr;

use anyhow::Result;
use tokio::sync::watch;
use tonic::transport::Server as TonicServer;

use crate::proto::destination_server::DestinationServer;

use super::server::DestinationApi;

pub struct ApiServer {
    addr: SocketAddr,
    api: DestinationApi,
}

impl ApiServer {
    pub fn new(host: &str, port: u16, api: DestinationApi) -> Result<Self> {
        let addr = SocketAddr::new(host.parse()?, port);
        Ok(Self { addr, api })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until the shutdown signal flips.
    pub async fn start(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        tracing::debug!(addr = %self.addr, "Starting destination gRPC server");

        TonicServer::builder()
            .add_service(DestinationServer::new(self.api))
            .serve_with_shutdown(self.addr, async move {
                let _ = shutdown_rx.wait_for(|&v| v).await;
                tracing::debug!("Destination gRPC server shutting down");
            })
            .await?;

        Ok(())
    }
}
