//! Endpoint-to-wire translation
//!
//! Converts an `EndpointAddress` plus its workload metadata into the
//! enriched `WeightedAddr` the proxy consumes: weight, TLS identity,
//! protocol hints, opaque transport, metric labels, and authority
//! override.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;

use crate::core::config::AppConfig;
use crate::core::constants::{
    BASE_ENDPOINT_WEIGHT, DEFAULT_INBOUND_PORT, IDENTITY_MODE_DEFAULT,
    LABEL_CONTROL_PLANE_NS_METRIC, LABEL_EXTERNAL_WORKLOAD, LABEL_OWNER_GROUP, LABEL_POD,
    LABEL_SERVICE_ACCOUNT, LABEL_ZONE, ZONE_WEIGHT_MULTIPLIER,
};
use crate::discovery::address::{AddressId, EndpointAddress};
use crate::proto;

/// Static inputs of the translation rules, derived from the controller
/// configuration.
#[derive(Debug, Clone)]
pub struct TranslateConfig {
    pub controller_namespace: String,
    pub identity_trust_domain: Option<String>,
    pub enable_h2_upgrade: bool,
    pub force_opaque_transport: bool,
    pub default_opaque_ports: BTreeSet<u16>,
    pub ext_endpoint_zone_weights: bool,
    pub meshed_http2: Option<proto::Http2ClientParams>,
}

impl TranslateConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            controller_namespace: config.controller_namespace.clone(),
            identity_trust_domain: config.identity_trust_domain.clone(),
            enable_h2_upgrade: config.enable_h2_upgrade,
            force_opaque_transport: config.force_opaque_transport,
            default_opaque_ports: config.default_opaque_ports.clone(),
            ext_endpoint_zone_weights: config.ext_endpoint_zone_weights,
            meshed_http2: config.meshed_http2(),
        }
    }
}

/// Per-stream translator: the static rules plus the calling proxy's
/// zone.
#[derive(Debug, Clone)]
pub struct EndpointTranslator {
    config: TranslateConfig,
    /// Zone of the calling proxy, for zone weighting.
    proxy_zone: Option<String>,
}

impl EndpointTranslator {
    pub fn new(config: TranslateConfig, proxy_zone: Option<String>) -> Self {
        Self { config, proxy_zone }
    }

    /// Build the Add payload for a set of endpoints sharing labels.
    pub fn weighted_addr_set(
        &self,
        addresses: &[EndpointAddress],
        labels: &BTreeMap<String, String>,
    ) -> proto::WeightedAddrSet {
        proto::WeightedAddrSet {
            addrs: addresses
                .iter()
                .map(|addr| self.weighted_addr(addr))
                .collect(),
            metric_labels: labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Build the Remove payload for a set of retired address IDs.
    pub fn addr_set(&self, ids: &[AddressId]) -> proto::AddrSet {
        proto::AddrSet {
            addrs: ids.iter().map(|id| tcp_address(id.ip, id.port)).collect(),
        }
    }

    /// Enrich one endpoint into its wire representation.
    pub fn weighted_addr(&self, addr: &EndpointAddress) -> proto::WeightedAddr {
        proto::WeightedAddr {
            addr: Some(tcp_address(addr.ip, addr.port)),
            weight: self.weight(addr),
            metric_labels: self.metric_labels(addr),
            tls_identity: self.tls_identity(addr),
            authority_override: addr.authority_override.as_ref().map(|authority| {
                proto::AuthorityOverride {
                    authority_override: authority.clone(),
                }
            }),
            protocol_hint: self.protocol_hint(addr),
            http2: self.http2_params(addr),
        }
    }

    /// Whether the endpoint's traffic should be treated as opaque.
    pub fn is_opaque(&self, addr: &EndpointAddress) -> bool {
        if addr.opaque_protocol {
            return true;
        }
        let annotated = addr.pod.as_ref().and_then(|pod| pod.opaque_ports.as_ref());
        let effective = annotated.unwrap_or(&self.config.default_opaque_ports);
        if effective.contains(&addr.port) {
            return true;
        }
        addr.pod
            .as_ref()
            .is_some_and(|pod| pod.server_opaque_ports.contains(&addr.port))
    }

    fn weight(&self, addr: &EndpointAddress) -> u32 {
        let mut weight = BASE_ENDPOINT_WEIGHT;
        if self.config.ext_endpoint_zone_weights
            && self.proxy_zone.is_some()
            && addr.zone == self.proxy_zone
        {
            weight *= ZONE_WEIGHT_MULTIPLIER;
        }
        weight
    }

    fn tls_identity(&self, addr: &EndpointAddress) -> Option<proto::TlsIdentity> {
        if let Some(workload) = &addr.external_workload {
            // External workloads advertise their mesh-TLS identity in
            // URI form, with an explicit server name.
            let (identity, server_name) =
                match (&workload.identity, &workload.server_name) {
                    (Some(identity), Some(server_name)) => (identity, server_name),
                    _ => return None,
                };
            return Some(proto::TlsIdentity {
                strategy: Some(proto::tls_identity::Strategy::UriLikeIdentity(
                    proto::UriLikeIdentity {
                        uri: identity.clone(),
                    },
                )),
                server_name: Some(proto::DnsLikeIdentity {
                    name: server_name.clone(),
                }),
            });
        }

        let trust_domain = self.config.identity_trust_domain.as_ref()?;

        if let Some(pod) = &addr.pod {
            if pod.control_plane_ns.as_deref() != Some(self.config.controller_namespace.as_str()) {
                return None;
            }
            if pod.identity_mode.as_deref() != Some(IDENTITY_MODE_DEFAULT) {
                return None;
            }
            let name = format!(
                "{}.{}.serviceaccount.identity.{}.{}",
                pod.service_account, pod.namespace, self.config.controller_namespace, trust_domain
            );
            return Some(proto::TlsIdentity {
                strategy: Some(proto::tls_identity::Strategy::DnsLikeIdentity(
                    proto::DnsLikeIdentity { name },
                )),
                server_name: None,
            });
        }

        // Non-pod addresses may carry an explicit identity.
        addr.identity.as_ref().map(|name| proto::TlsIdentity {
            strategy: Some(proto::tls_identity::Strategy::DnsLikeIdentity(
                proto::DnsLikeIdentity { name: name.clone() },
            )),
            server_name: None,
        })
    }

    fn protocol_hint(&self, addr: &EndpointAddress) -> Option<proto::ProtocolHint> {
        let meshed =
            addr.pod.as_ref().is_some_and(|pod| pod.is_meshed()) || addr.external_workload.is_some();
        if !meshed {
            return None;
        }

        let opaque = self.is_opaque(addr);
        let protocol = if opaque {
            Some(proto::protocol_hint::Protocol::Opaque(proto::Empty {}))
        } else if self.config.enable_h2_upgrade {
            Some(proto::protocol_hint::Protocol::H2(proto::Empty {}))
        } else {
            None
        };

        let opaque_transport = if opaque || self.config.force_opaque_transport {
            Some(proto::OpaqueTransport {
                inbound_port: u32::from(self.inbound_port(addr)),
            })
        } else {
            None
        };

        if protocol.is_none() && opaque_transport.is_none() {
            return None;
        }
        Some(proto::ProtocolHint {
            protocol,
            opaque_transport,
        })
    }

    fn inbound_port(&self, addr: &EndpointAddress) -> u16 {
        addr.pod
            .as_ref()
            .and_then(|pod| pod.inbound_port)
            .or_else(|| {
                addr.external_workload
                    .as_ref()
                    .and_then(|workload| workload.inbound_port)
            })
            .unwrap_or(DEFAULT_INBOUND_PORT)
    }

    fn http2_params(&self, addr: &EndpointAddress) -> Option<proto::Http2ClientParams> {
        let meshed = addr.pod.as_ref().is_some_and(|pod| pod.is_meshed());
        if meshed && self.config.enable_h2_upgrade {
            self.config.meshed_http2
        } else {
            None
        }
    }

    fn metric_labels(&self, addr: &EndpointAddress) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        if let Some(pod) = &addr.pod {
            labels.insert(LABEL_POD.to_string(), pod.name.clone());
            labels.insert(
                LABEL_SERVICE_ACCOUNT.to_string(),
                pod.service_account.clone(),
            );
            if let Some(owner) = &pod.owner {
                labels.insert(owner.kind.to_lowercase(), owner.name.clone());
            }
            if let Some(control_plane_ns) = &pod.control_plane_ns {
                labels.insert(
                    LABEL_CONTROL_PLANE_NS_METRIC.to_string(),
                    control_plane_ns.clone(),
                );
            }
        } else if let Some(workload) = &addr.external_workload {
            labels.insert(LABEL_EXTERNAL_WORKLOAD.to_string(), workload.name.clone());
            if let Some(owner_group) = &workload.owner_group {
                labels.insert(LABEL_OWNER_GROUP.to_string(), owner_group.clone());
            }
        }
        if let Some(zone) = &addr.zone {
            labels.insert(LABEL_ZONE.to_string(), zone.clone());
        }
        labels
    }
}

/// Encode an IP and port into the wire address form.
pub fn tcp_address(ip: IpAddr, port: u16) -> proto::TcpAddress {
    let ip = match ip {
        IpAddr::V4(v4) => proto::ip_address::Ip::Ipv4(u32::from(v4)),
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            proto::ip_address::Ip::Ipv6(proto::Ipv6 {
                first: (bits >> 64) as u64,
                last: bits as u64,
            })
        }
    };
    proto::TcpAddress {
        ip: Some(proto::IpAddress { ip: Some(ip) }),
        port: u32::from(port),
    }
}
