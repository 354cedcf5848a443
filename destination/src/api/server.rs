//! Destination service facade
//!
//! Implements the proxy-facing `Destination` service: parses the
//! authority and context token, then routes each RPC onto the local,
//! federated, or per-endpoint path. `Get` streams endpoint updates
//! through a per-stream dispatcher; `GetProfile` streams merged
//! profiles through the profile pipeline.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

use crate::core::config::AppConfig;
use crate::discovery::address::{EndpointAddress, ServiceKey};
use crate::discovery::dispatch::{StreamCounters, StreamDispatcher};
use crate::discovery::error::DiscoveryError;
use crate::discovery::federated::spawn_federated_watcher;
use crate::discovery::filter::ViewFilter;
use crate::discovery::index::{PodEntry, ServiceIndex};
use crate::discovery::topic::TopicRegistry;
use crate::discovery::view::ViewConfig;
use crate::profiles::pipeline::{ProfilePipeline, spawn_profile_stream};
use crate::profiles::source::{ProfileRegistry, ProfileSource};
use crate::profiles::spawn_endpoint_profile_stream;
use crate::proto;
use crate::proto::destination_server::Destination;
use crate::translate::{EndpointTranslator, TranslateConfig};

use super::authority::{Authority, parse_authority};
use super::context::{ContextToken, parse_context_token};

type UpdateStream = Pin<Box<dyn Stream<Item = Result<proto::Update, Status>> + Send>>;
type ProfileStream =
    Pin<Box<dyn Stream<Item = Result<proto::DestinationProfile, Status>> + Send>>;

/// The gRPC-facing destination service.
pub struct DestinationApi {
    config: AppConfig,
    translate: TranslateConfig,
    registry: Arc<TopicRegistry>,
    index: Arc<ServiceIndex>,
    profiles: Arc<ProfileRegistry>,
    counters: Arc<StreamCounters>,
}

impl DestinationApi {
    pub fn new(
        config: AppConfig,
        registry: Arc<TopicRegistry>,
        index: Arc<ServiceIndex>,
        profiles: Arc<ProfileRegistry>,
        counters: Arc<StreamCounters>,
    ) -> Self {
        let translate = TranslateConfig::from_app(&config);
        Self {
            config,
            translate,
            registry,
            index,
            profiles,
            counters,
        }
    }

    /// Resolve the per-stream filter and translator from the proxy's
    /// context token.
    fn view_inputs(&self, token: &ContextToken) -> (ViewFilter, EndpointTranslator) {
        let node = (!token.node_name.is_empty()).then(|| token.node_name.clone());
        let zone = node.as_deref().and_then(|node| self.index.zone_for_node(node));
        let filter = ViewFilter {
            node,
            zone: zone.clone(),
            enable_ipv6: self.config.enable_ipv6,
            zone_filtering: self.config.enable_endpoint_filtering,
        };
        let translator = EndpointTranslator::new(self.translate.clone(), zone);
        (filter, translator)
    }

    fn service_fqn(&self, key: &ServiceKey) -> String {
        format!(
            "{}.{}.svc.{}",
            key.name, key.namespace, self.config.cluster_domain
        )
    }

    /// Stream endpoint updates for a service authority. Every service
    /// runs through the federated watcher; an ordinary service is the
    /// single-member case.
    fn get_service_stream(
        &self,
        key: ServiceKey,
        token: &ContextToken,
    ) -> Result<UpdateStream, Status> {
        if let Some(hostname) = &key.hostname {
            let pod_rx = self
                .index
                .pod_by_name(&key.namespace, hostname)
                .ok_or_else(|| Status::from(DiscoveryError::InvalidService(key.to_string())))?;
            let entry = pod_rx.borrow().clone();
            return Ok(self.pod_update_stream(entry, key.port, token));
        }

        let entry = self
            .index
            .service(&key.namespace, &key.name)
            .ok_or_else(|| Status::from(DiscoveryError::InvalidService(key.to_string())))?;

        let (filter, translator) = self.view_inputs(token);
        let cancel = CancellationToken::new();
        let (dispatcher, queue) = StreamDispatcher::new(
            self.config.stream_queue_capacity,
            self.config.stream_send_timeout,
            cancel.clone(),
            Arc::clone(&self.counters),
        );
        let view_config = ViewConfig {
            filter,
            translator,
            initial_no_endpoints: true,
        };
        // The watcher exits on its own once the stream cancels.
        let _watcher = spawn_federated_watcher(
            dispatcher.clone(),
            Arc::clone(&self.registry),
            key,
            entry.subscribe_members(),
            view_config,
            cancel.clone(),
        );

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let result = tokio::select! {
                // Reset: tear the stream down so the proxy reconnects.
                _ = cancel.cancelled() => Ok(()),
                result = queue.process(|update| {
                    let tx = tx.clone();
                    async move {
                        tx.send(Ok(update))
                            .await
                            .map_err(|_| DiscoveryError::SendFailure("stream closed".into()))
                    }
                }) => result,
            };
            if let Err(error) = result {
                tracing::debug!(%error, "Get stream send loop ended");
            }
            cancel.cancel();
            dispatcher.close();
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// A static single-endpoint stream for pod authorities: one Add,
    /// then the stream stays open until the client goes away.
    fn pod_update_stream(&self, entry: PodEntry, port: u16, token: &ContextToken) -> UpdateStream {
        let (_, translator) = self.view_inputs(token);
        let mut address = EndpointAddress::new(entry.ip, port);
        address.pod = Some(Arc::clone(&entry.pod));
        let set = translator.weighted_addr_set(&[address], &BTreeMap::new());

        Box::pin(async_stream::stream! {
            yield Ok(proto::Update {
                update: Some(proto::update::Update::Add(set)),
            });
            // Hold the stream open; it is dropped when the client
            // disconnects.
            futures::future::pending::<()>().await;
        })
    }

    fn get_ip_stream(
        &self,
        ip: IpAddr,
        port: u16,
        token: &ContextToken,
    ) -> Result<UpdateStream, Status> {
        if let Some((namespace, name)) =
            self.index.service_by_cluster_ip(ip).map_err(Status::from)?
        {
            return self.get_service_stream(ServiceKey::new(namespace, name, port), token);
        }
        let pod_rx = self
            .index
            .pod_by_ip(ip)
            .ok_or_else(|| Status::from(DiscoveryError::InvalidService(format!("{ip}:{port}"))))?;
        let entry = pod_rx.borrow().clone();
        Ok(self.pod_update_stream(entry, port, token))
    }

    /// Stream merged profiles for a service authority.
    fn service_profile_stream(
        &self,
        key: &ServiceKey,
        token: &ContextToken,
    ) -> Result<ProfileStream, Status> {
        let entry = self
            .index
            .service(&key.namespace, &key.name)
            .ok_or_else(|| Status::from(DiscoveryError::InvalidService(key.to_string())))?;

        let fqn = self.service_fqn(key);
        let backup = self.profiles.subscribe(&key.namespace, &fqn);
        let source = if !token.ns.is_empty() && token.ns != key.namespace {
            // Client-namespace profile takes precedence once both
            // sources have initialized.
            let primary = self.profiles.subscribe(&token.ns, &fqn);
            ProfileSource::with_fallback(primary, backup)
        } else {
            ProfileSource::single(backup)
        };

        let pipeline = ProfilePipeline {
            fqn,
            port: key.port,
            namespace: key.namespace.clone(),
            cluster_domain: self.config.cluster_domain.clone(),
            default_opaque_ports: self.config.default_opaque_ports.clone(),
            annotated_opaque_ports: entry.opaque_ports().cloned(),
        };
        let rx = spawn_profile_stream(
            source,
            pipeline,
            self.config.profile_queue_capacity,
            CancellationToken::new(),
        );
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn endpoint_profile_stream(
        &self,
        pod_rx: tokio::sync::watch::Receiver<PodEntry>,
        port: u16,
        fqn: String,
        token: &ContextToken,
    ) -> ProfileStream {
        let (_, translator) = self.view_inputs(token);
        let rx = spawn_endpoint_profile_stream(
            pod_rx,
            port,
            fqn,
            translator,
            self.config.profile_queue_capacity,
            Arc::clone(&self.counters),
            CancellationToken::new(),
        );
        Box::pin(ReceiverStream::new(rx))
    }

    fn get_profile_stream(
        &self,
        authority: Authority,
        token: &ContextToken,
    ) -> Result<ProfileStream, Status> {
        match authority {
            Authority::Service { key } => {
                if let Some(hostname) = &key.hostname {
                    // Pod DNS name: profile for the one endpoint.
                    let pod_rx = self
                        .index
                        .pod_by_name(&key.namespace, hostname)
                        .ok_or_else(|| {
                            Status::from(DiscoveryError::InvalidService(key.to_string()))
                        })?;
                    let fqn = format!("{}.{}", hostname, self.service_fqn(&key));
                    return Ok(self.endpoint_profile_stream(pod_rx, key.port, fqn, token));
                }
                self.service_profile_stream(&key, token)
            }
            Authority::Ip { ip, port } => {
                if let Some((namespace, name)) =
                    self.index.service_by_cluster_ip(ip).map_err(Status::from)?
                {
                    return self
                        .service_profile_stream(&ServiceKey::new(namespace, name, port), token);
                }
                let pod_rx = self.index.pod_by_ip(ip).ok_or_else(|| {
                    Status::from(DiscoveryError::InvalidService(format!("{ip}:{port}")))
                })?;
                Ok(self.endpoint_profile_stream(pod_rx, port, format!("{ip}:{port}"), token))
            }
        }
    }
}

#[tonic::async_trait]
impl Destination for DestinationApi {
    type GetStream = UpdateStream;

    async fn get(
        &self,
        request: Request<proto::GetDestination>,
    ) -> Result<Response<Self::GetStream>, Status> {
        let dest = request.into_inner();
        let token = parse_context_token(&dest.context_token);
        let authority =
            parse_authority(&dest.path, &self.config.cluster_domain).map_err(Status::from)?;
        tracing::debug!(path = %dest.path, client_ns = %token.ns, "Get");

        let stream = match authority {
            Authority::Service { key } => self.get_service_stream(key, &token)?,
            Authority::Ip { ip, port } => self.get_ip_stream(ip, port, &token)?,
        };
        Ok(Response::new(stream))
    }

    type GetProfileStream = ProfileStream;

    async fn get_profile(
        &self,
        request: Request<proto::GetDestination>,
    ) -> Result<Response<Self::GetProfileStream>, Status> {
        let dest = request.into_inner();
        let token = parse_context_token(&dest.context_token);
        let authority =
            parse_authority(&dest.path, &self.config.cluster_domain).map_err(Status::from)?;
        tracing::debug!(path = %dest.path, client_ns = %token.ns, "GetProfile");

        let stream = self.get_profile_stream(authority, &token)?;
        Ok(Response::new(stream))
    }
}
