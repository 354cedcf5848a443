//! Service and workload index
//!
//! Informer-fed lookup tables the server facade consults to resolve an
//! authority: services (with cluster IPs, profile-relevant annotations
//! and federation membership), pods by IP and by DNS-style name, and
//! node-to-zone topology. The informer layer owns writes; the facade
//! only reads.

use std::collections::{BTreeSet, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::core::constants::LOCAL_CLUSTER;

use super::address::Pod;
use super::error::DiscoveryError;

/// Everything the facade needs to know about one service.
pub struct ServiceEntry {
    cluster_ips: Vec<IpAddr>,
    /// Opaque-port annotation on the service or its namespace.
    opaque_ports: Option<BTreeSet<u16>>,
    /// Member clusters contributing endpoints; `{"local"}` for
    /// ordinary services.
    members: watch::Sender<BTreeSet<String>>,
}

impl ServiceEntry {
    pub fn cluster_ips(&self) -> &[IpAddr] {
        &self.cluster_ips
    }

    pub fn opaque_ports(&self) -> Option<&BTreeSet<u16>> {
        self.opaque_ports.as_ref()
    }

    pub fn members(&self) -> BTreeSet<String> {
        self.members.borrow().clone()
    }

    /// Subscribe to federation membership changes.
    pub fn subscribe_members(&self) -> watch::Receiver<BTreeSet<String>> {
        self.members.subscribe()
    }
}

/// A pod keyed into the index, along with its primary IP.
#[derive(Clone)]
pub struct PodEntry {
    pub ip: IpAddr,
    pub pod: Arc<Pod>,
}

type PodSender = watch::Sender<PodEntry>;

/// Read-optimized registry of services, pods, and node topology.
#[derive(Default)]
pub struct ServiceIndex {
    services: DashMap<(String, String), Arc<ServiceEntry>>,
    by_cluster_ip: DashMap<IpAddr, HashSet<(String, String)>>,
    pods_by_ip: DashMap<IpAddr, PodSender>,
    pods_by_name: DashMap<(String, String), PodSender>,
    node_zones: DashMap<String, String>,
}

impl ServiceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Informer-facing writes
    // =========================================================================

    /// Insert or replace a service. Preserves an existing federation
    /// membership channel so open streams keep their subscriptions.
    pub fn upsert_service(
        &self,
        namespace: &str,
        name: &str,
        cluster_ips: Vec<IpAddr>,
        opaque_ports: Option<BTreeSet<u16>>,
    ) {
        let id = (namespace.to_string(), name.to_string());

        if let Some(previous) = self.services.get(&id) {
            for ip in previous.cluster_ips() {
                if let Some(mut owners) = self.by_cluster_ip.get_mut(ip) {
                    owners.remove(&id);
                }
            }
        }
        for ip in &cluster_ips {
            self.by_cluster_ip.entry(*ip).or_default().insert(id.clone());
        }

        let members = match self.services.get(&id) {
            Some(previous) => previous.members.clone(),
            None => watch::channel(BTreeSet::from([LOCAL_CLUSTER.to_string()])).0,
        };
        self.services.insert(
            id,
            Arc::new(ServiceEntry {
                cluster_ips,
                opaque_ports,
                members,
            }),
        );
    }

    /// Replace a service's federation membership.
    pub fn set_members(&self, namespace: &str, name: &str, members: BTreeSet<String>) {
        let id = (namespace.to_string(), name.to_string());
        if let Some(entry) = self.services.get(&id) {
            // send_replace updates the value even with no subscribers.
            entry.members.send_replace(members);
        }
    }

    pub fn remove_service(&self, namespace: &str, name: &str) {
        let id = (namespace.to_string(), name.to_string());
        if let Some((_, entry)) = self.services.remove(&id) {
            for ip in entry.cluster_ips() {
                if let Some(mut owners) = self.by_cluster_ip.get_mut(ip) {
                    owners.remove(&id);
                }
            }
        }
    }

    /// Insert or update a pod; open endpoint-profile streams observe
    /// the change through their watch subscriptions.
    pub fn upsert_pod(&self, ip: IpAddr, pod: Pod) {
        let id = (pod.namespace.clone(), pod.name.clone());
        let entry = PodEntry {
            ip,
            pod: Arc::new(pod),
        };
        match self.pods_by_ip.get(&ip) {
            Some(sender) => {
                sender.send_replace(entry.clone());
            }
            None => {
                let (tx, _) = watch::channel(entry.clone());
                self.pods_by_ip.insert(ip, tx);
            }
        }
        match self.pods_by_name.get(&id) {
            Some(sender) => {
                sender.send_replace(entry);
            }
            None => {
                let (tx, _) = watch::channel(entry);
                self.pods_by_name.insert(id, tx);
            }
        }
    }

    /// Remove a pod; watchers see their channel close.
    pub fn remove_pod(&self, namespace: &str, name: &str) {
        let id = (namespace.to_string(), name.to_string());
        if let Some((_, sender)) = self.pods_by_name.remove(&id) {
            let ip = sender.borrow().ip;
            self.pods_by_ip.remove(&ip);
        }
    }

    pub fn set_node_zone(&self, node: &str, zone: &str) {
        self.node_zones.insert(node.to_string(), zone.to_string());
    }

    // =========================================================================
    // Facade-facing reads
    // =========================================================================

    pub fn service(&self, namespace: &str, name: &str) -> Option<Arc<ServiceEntry>> {
        self.services
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Resolve a cluster IP to its owning service. More than one owner
    /// is a conflict.
    pub fn service_by_cluster_ip(
        &self,
        ip: IpAddr,
    ) -> Result<Option<(String, String)>, DiscoveryError> {
        let Some(owners) = self.by_cluster_ip.get(&ip) else {
            return Ok(None);
        };
        let mut iter = owners.iter();
        let Some(first) = iter.next() else {
            return Ok(None);
        };
        if iter.next().is_some() {
            return Err(DiscoveryError::ConflictingServiceIp(ip));
        }
        Ok(Some(first.clone()))
    }

    pub fn pod_by_ip(&self, ip: IpAddr) -> Option<watch::Receiver<PodEntry>> {
        self.pods_by_ip.get(&ip).map(|sender| sender.subscribe())
    }

    pub fn pod_by_name(&self, namespace: &str, name: &str) -> Option<watch::Receiver<PodEntry>> {
        self.pods_by_name
            .get(&(namespace.to_string(), name.to_string()))
            .map(|sender| sender.subscribe())
    }

    pub fn zone_for_node(&self, node: &str) -> Option<String> {
        self.node_zones.get(node).map(|zone| zone.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(ns: &str, name: &str) -> Pod {
        Pod {
            namespace: ns.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_service_lookup() {
        let index = ServiceIndex::new();
        index.upsert_service("emojivoto", "web", vec!["10.96.0.10".parse().unwrap()], None);

        let entry = index.service("emojivoto", "web").unwrap();
        assert_eq!(entry.cluster_ips().len(), 1);
        assert_eq!(entry.members(), BTreeSet::from(["local".to_string()]));
        assert!(index.service("emojivoto", "missing").is_none());
    }

    #[test]
    fn test_cluster_ip_resolution() {
        let index = ServiceIndex::new();
        let ip: IpAddr = "10.96.0.10".parse().unwrap();
        index.upsert_service("emojivoto", "web", vec![ip], None);

        let owner = index.service_by_cluster_ip(ip).unwrap().unwrap();
        assert_eq!(owner, ("emojivoto".to_string(), "web".to_string()));
        assert!(
            index
                .service_by_cluster_ip("10.96.0.99".parse().unwrap())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_conflicting_cluster_ip() {
        let index = ServiceIndex::new();
        let ip: IpAddr = "10.96.0.10".parse().unwrap();
        index.upsert_service("emojivoto", "web", vec![ip], None);
        index.upsert_service("emojivoto", "voting", vec![ip], None);

        assert!(matches!(
            index.service_by_cluster_ip(ip),
            Err(DiscoveryError::ConflictingServiceIp(_))
        ));
    }

    #[test]
    fn test_upsert_service_replaces_cluster_ip() {
        let index = ServiceIndex::new();
        let old: IpAddr = "10.96.0.10".parse().unwrap();
        let new: IpAddr = "10.96.0.11".parse().unwrap();
        index.upsert_service("emojivoto", "web", vec![old], None);
        index.upsert_service("emojivoto", "web", vec![new], None);

        assert!(index.service_by_cluster_ip(old).unwrap().is_none());
        assert_eq!(
            index.service_by_cluster_ip(new).unwrap().unwrap().1,
            "web"
        );
    }

    #[tokio::test]
    async fn test_membership_subscription_survives_upsert() {
        let index = ServiceIndex::new();
        index.upsert_service("emojivoto", "web", vec![], None);
        let entry = index.service("emojivoto", "web").unwrap();
        let mut members = entry.subscribe_members();

        // Re-upsert (informer resync), then change membership.
        index.upsert_service("emojivoto", "web", vec![], None);
        index.set_members(
            "emojivoto",
            "web",
            BTreeSet::from(["local".to_string(), "east".to_string()]),
        );

        members.changed().await.unwrap();
        assert_eq!(members.borrow().len(), 2);
    }

    #[tokio::test]
    async fn test_pod_watch_observes_updates() {
        let index = ServiceIndex::new();
        let ip: IpAddr = "10.0.0.7".parse().unwrap();
        index.upsert_pod(ip, pod("emojivoto", "web-0"));

        let mut by_ip = index.pod_by_ip(ip).unwrap();
        assert_eq!(by_ip.borrow().pod.name, "web-0");

        let mut updated = pod("emojivoto", "web-0");
        updated.server_opaque_ports = BTreeSet::from([8080]);
        index.upsert_pod(ip, updated);

        by_ip.changed().await.unwrap();
        assert!(by_ip.borrow().pod.server_opaque_ports.contains(&8080));
    }

    #[test]
    fn test_remove_pod_clears_both_keys() {
        let index = ServiceIndex::new();
        let ip: IpAddr = "10.0.0.7".parse().unwrap();
        index.upsert_pod(ip, pod("emojivoto", "web-0"));
        index.remove_pod("emojivoto", "web-0");

        assert!(index.pod_by_ip(ip).is_none());
        assert!(index.pod_by_name("emojivoto", "web-0").is_none());
    }

    #[test]
    fn test_node_zone_lookup() {
        let index = ServiceIndex::new();
        index.set_node_zone("node-1", "z1");
        assert_eq!(index.zone_for_node("node-1").as_deref(), Some("z1"));
        assert!(index.zone_for_node("node-2").is_none());
    }
}
