//! Endpoint data model
//!
//! Immutable values flowing from the informer-facing publishers to the
//! per-stream views: a `ServiceKey` names a topic, an `AddressSet` is
//! the canonical endpoint set for one service port, and an
//! `AddressSnapshot` is a published, versioned set. Snapshots are never
//! mutated after publish; a re-publish replaces the whole value.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// Identifies one endpoint topic: a service port, optionally narrowed
/// to a named host (stateful workload instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub namespace: String,
    pub name: String,
    pub port: u16,
    pub hostname: Option<String>,
}

impl ServiceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, port: u16) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            port,
            hostname: None,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hostname {
            Some(hostname) => write!(
                f,
                "{}.{}.{}:{}",
                hostname, self.name, self.namespace, self.port
            ),
            None => write!(f, "{}.{}:{}", self.name, self.namespace, self.port),
        }
    }
}

/// Uniquely identifies an address within a snapshot.
///
/// `namespace`/`name` come from the owning pod or external workload and
/// are empty for bare addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressId {
    pub namespace: String,
    pub name: String,
    pub ip: IpAddr,
    pub port: u16,
}

/// Owner reference of a pod, e.g. its Deployment or StatefulSet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

/// Pod metadata the translator needs; the pod's lifetime is owned by
/// the informer layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub service_account: String,
    pub node: Option<String>,
    /// Value of the control-plane namespace label, when injected.
    pub control_plane_ns: Option<String>,
    /// Value of the identity-mode annotation.
    pub identity_mode: Option<String>,
    /// Opaque-port annotation; overrides the configured default set.
    pub opaque_ports: Option<BTreeSet<u16>>,
    /// Ports a selecting Server resource declared opaque.
    pub server_opaque_ports: BTreeSet<u16>,
    /// Inbound proxy listen port declared by the proxy container.
    pub inbound_port: Option<u16>,
    pub owner: Option<OwnerRef>,
}

impl Pod {
    /// Whether the pod carries an injected proxy from this mesh.
    pub fn is_meshed(&self) -> bool {
        self.control_plane_ns.is_some()
    }
}

/// Mesh-external workload metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExternalWorkload {
    pub namespace: String,
    pub name: String,
    /// Mesh-TLS identity in URI form, when the workload has one.
    pub identity: Option<String>,
    /// TLS server name paired with the identity.
    pub server_name: Option<String>,
    /// Owner-group label for metric attribution.
    pub owner_group: Option<String>,
    /// Inbound proxy listen port declared for the workload.
    pub inbound_port: Option<u16>,
}

/// One endpoint of a service port, enriched with workload metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointAddress {
    pub ip: IpAddr,
    pub port: u16,
    /// Topology zone the endpoint runs in.
    pub zone: Option<String>,
    /// Hostname for named instances of stateful workloads.
    pub hostname: Option<String>,
    /// Topology-aware routing hints; empty means unhinted.
    pub for_zones: Vec<String>,
    pub pod: Option<Arc<Pod>>,
    pub external_workload: Option<Arc<ExternalWorkload>>,
    pub authority_override: Option<String>,
    /// Explicit TLS identity for addresses without pod metadata.
    pub identity: Option<String>,
    /// Whether the endpoint's protocol was marked opaque upstream.
    pub opaque_protocol: bool,
}

impl EndpointAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port,
            zone: None,
            hostname: None,
            for_zones: Vec::new(),
            pod: None,
            external_workload: None,
            authority_override: None,
            identity: None,
            opaque_protocol: false,
        }
    }

    pub fn with_pod(mut self, pod: Pod) -> Self {
        self.pod = Some(Arc::new(pod));
        self
    }

    pub fn with_external_workload(mut self, workload: ExternalWorkload) -> Self {
        self.external_workload = Some(Arc::new(workload));
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn with_for_zones<I, S>(mut self, zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.for_zones = zones.into_iter().map(Into::into).collect();
        self
    }

    /// Identity of this address within a snapshot.
    pub fn id(&self) -> AddressId {
        let (namespace, name) = if let Some(pod) = &self.pod {
            (pod.namespace.clone(), pod.name.clone())
        } else if let Some(workload) = &self.external_workload {
            (workload.namespace.clone(), workload.name.clone())
        } else {
            (String::new(), String::new())
        };
        AddressId {
            namespace,
            name,
            ip: self.ip,
            port: self.port,
        }
    }
}

/// Canonical endpoint set for a service port, as the publisher sees it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressSet {
    pub addresses: HashMap<AddressId, EndpointAddress>,
    /// Labels shared by the whole set (`service`, `namespace`).
    pub labels: BTreeMap<String, String>,
    /// Retain only node-local endpoints for subscribing proxies.
    pub local_traffic_policy: bool,
}

impl AddressSet {
    pub fn new(service: &ServiceKey) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(
            crate::core::constants::LABEL_SERVICE.to_string(),
            service.name.clone(),
        );
        labels.insert(
            crate::core::constants::LABEL_NAMESPACE.to_string(),
            service.namespace.clone(),
        );
        Self {
            addresses: HashMap::new(),
            labels,
            local_traffic_policy: false,
        }
    }

    /// Insert an address, keyed by its ID.
    pub fn insert(&mut self, address: EndpointAddress) {
        self.addresses.insert(address.id(), address);
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }
}

/// A published, versioned endpoint set. Read-only once handed to
/// subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressSnapshot {
    pub set: AddressSet,
    /// `"local"` or the remote cluster the endpoints came from.
    pub cluster: String,
    /// Monotonically increasing per topic.
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(ns: &str, name: &str) -> Pod {
        Pod {
            namespace: ns.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_service_key_display() {
        let key = ServiceKey::new("emojivoto", "web", 8080);
        assert_eq!(key.to_string(), "web.emojivoto:8080");

        let key = key.with_hostname("web-0");
        assert_eq!(key.to_string(), "web-0.web.emojivoto:8080");
    }

    #[test]
    fn test_address_id_from_pod() {
        let addr = EndpointAddress::new("10.0.0.1".parse().unwrap(), 8080)
            .with_pod(pod("emojivoto", "web-abc123"));
        let id = addr.id();
        assert_eq!(id.namespace, "emojivoto");
        assert_eq!(id.name, "web-abc123");
        assert_eq!(id.port, 8080);
    }

    #[test]
    fn test_address_id_bare() {
        let addr = EndpointAddress::new("192.168.1.9".parse().unwrap(), 443);
        let id = addr.id();
        assert!(id.namespace.is_empty());
        assert!(id.name.is_empty());
    }

    #[test]
    fn test_address_set_labels_and_insert() {
        let key = ServiceKey::new("emojivoto", "web", 8080);
        let mut set = AddressSet::new(&key);
        assert_eq!(set.labels.get("service").map(String::as_str), Some("web"));
        assert_eq!(
            set.labels.get("namespace").map(String::as_str),
            Some("emojivoto")
        );

        set.insert(
            EndpointAddress::new("10.0.0.1".parse().unwrap(), 8080).with_pod(pod("emojivoto", "a")),
        );
        set.insert(
            EndpointAddress::new("10.0.0.2".parse().unwrap(), 8080).with_pod(pod("emojivoto", "b")),
        );
        assert_eq!(set.len(), 2);

        // Re-inserting the same identity replaces, not duplicates.
        set.insert(
            EndpointAddress::new("10.0.0.2".parse().unwrap(), 8080).with_pod(pod("emojivoto", "b")),
        );
        assert_eq!(set.len(), 2);
    }
}
