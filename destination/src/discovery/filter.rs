//! Snapshot filtering and diffing
//!
//! Pure functions applied by each view to the latest snapshot before
//! updates are produced:
//!
//! 1. Address family: drop IPv6 when disabled; otherwise suppress an
//!    IPv4 address whenever the same workload also publishes IPv6.
//! 2. Local traffic policy: keep only node-local endpoints, with no
//!    fallback.
//! 3. Topology hints: keep same-zone endpoints, falling back to the
//!    whole set when any endpoint is unhinted or the zoned set would
//!    be empty.
//! 4. Diff against the previous filtered set, where a changed address
//!    with a surviving ID is emitted as an Add (the proxy upserts).

use std::collections::{HashMap, HashSet};

use crate::core::constants::LOCAL_CLUSTER;

use super::address::{AddressId, AddressSnapshot, EndpointAddress};

/// Per-view filter configuration, resolved from the proxy's context
/// token and the controller config.
#[derive(Debug, Clone, Default)]
pub struct ViewFilter {
    /// Node the calling proxy runs on; drives local-traffic-policy.
    pub node: Option<String>,
    /// Zone the calling proxy runs in; drives topology hints.
    pub zone: Option<String>,
    pub enable_ipv6: bool,
    /// Master switch for topology-aware filtering.
    pub zone_filtering: bool,
}

/// Apply the filter pipeline to a snapshot, yielding the address set a
/// single view should expose.
pub fn filter_snapshot(
    snapshot: &AddressSnapshot,
    filter: &ViewFilter,
) -> HashMap<AddressId, EndpointAddress> {
    let mut keep = snapshot.set.addresses.clone();

    filter_address_family(&mut keep, filter.enable_ipv6);

    if snapshot.set.local_traffic_policy {
        // Node-local only; hints never apply under a local policy.
        keep.retain(|_, addr| {
            match (&filter.node, addr.pod.as_ref().and_then(|p| p.node.as_ref())) {
                (Some(node), Some(pod_node)) => node == pod_node,
                _ => false,
            }
        });
        return keep;
    }

    if !filter.zone_filtering || snapshot.cluster != LOCAL_CLUSTER {
        return keep;
    }
    filter_by_zone(keep, filter.zone.as_deref())
}

fn filter_address_family(keep: &mut HashMap<AddressId, EndpointAddress>, enable_ipv6: bool) {
    if !enable_ipv6 {
        keep.retain(|_, addr| addr.ip.is_ipv4());
        return;
    }
    // Prefer IPv6: an IPv4 address is suppressed when the same workload
    // publishes an IPv6 alternative on the same port.
    let dual: HashSet<(String, String, u16)> = keep
        .values()
        .filter(|addr| addr.ip.is_ipv6())
        .map(workload_key)
        .collect();
    keep.retain(|_, addr| addr.ip.is_ipv6() || !dual.contains(&workload_key(addr)));
}

fn workload_key(addr: &EndpointAddress) -> (String, String, u16) {
    let id = addr.id();
    (id.namespace, id.name, id.port)
}

fn filter_by_zone(
    keep: HashMap<AddressId, EndpointAddress>,
    zone: Option<&str>,
) -> HashMap<AddressId, EndpointAddress> {
    let Some(zone) = zone else {
        return keep;
    };
    // Any unhinted address disables zone filtering for the whole set.
    if keep.values().any(|addr| addr.for_zones.is_empty()) {
        return keep;
    }
    let zoned: HashMap<AddressId, EndpointAddress> = keep
        .iter()
        .filter(|(_, addr)| addr.for_zones.iter().any(|z| z == zone))
        .map(|(id, addr)| (id.clone(), addr.clone()))
        .collect();
    if zoned.is_empty() { keep } else { zoned }
}

/// The incremental change between two filtered sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetDiff {
    pub add: Vec<EndpointAddress>,
    pub remove: Vec<AddressId>,
}

impl SetDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Diff two filtered sets by address ID.
///
/// An ID present on both sides with different content lands in `add`
/// only; the proxy treats Add as an upsert. Output is sorted for
/// deterministic update ordering.
pub fn diff_sets(
    prev: &HashMap<AddressId, EndpointAddress>,
    next: &HashMap<AddressId, EndpointAddress>,
) -> SetDiff {
    let mut add: Vec<EndpointAddress> = next
        .iter()
        .filter(|(id, addr)| prev.get(id) != Some(addr))
        .map(|(_, addr)| addr.clone())
        .collect();
    let mut remove: Vec<AddressId> = prev
        .keys()
        .filter(|id| !next.contains_key(id))
        .cloned()
        .collect();

    add.sort_by(|a, b| a.id().cmp(&b.id()));
    remove.sort();
    SetDiff { add, remove }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::address::{AddressSet, Pod, ServiceKey};
    use std::net::IpAddr;

    fn pod_on(node: &str, name: &str) -> Pod {
        Pod {
            namespace: "emojivoto".into(),
            name: name.into(),
            node: Some(node.into()),
            ..Default::default()
        }
    }

    fn named_pod(name: &str) -> Pod {
        Pod {
            namespace: "emojivoto".into(),
            name: name.into(),
            ..Default::default()
        }
    }

    fn snapshot(addrs: Vec<EndpointAddress>) -> AddressSnapshot {
        let mut set = AddressSet::new(&ServiceKey::new("emojivoto", "web", 8080));
        for addr in addrs {
            set.insert(addr);
        }
        AddressSnapshot {
            set,
            cluster: LOCAL_CLUSTER.to_string(),
            version: 1,
        }
    }

    fn addr(ip: &str, name: &str) -> EndpointAddress {
        EndpointAddress::new(ip.parse().unwrap(), 8080).with_pod(named_pod(name))
    }

    #[test]
    fn test_ipv6_dropped_when_disabled() {
        let snap = snapshot(vec![addr("10.0.0.1", "a"), addr("2001:db8::1", "b")]);
        let filter = ViewFilter::default();
        let kept = filter_snapshot(&snap, &filter);
        assert_eq!(kept.len(), 1);
        assert!(kept.values().all(|a| a.ip.is_ipv4()));
    }

    #[test]
    fn test_ipv4_suppressed_when_workload_has_ipv6() {
        // Same pod publishes both families; IPv6 wins. A v4-only pod is
        // untouched.
        let snap = snapshot(vec![
            addr("10.0.0.1", "dual"),
            addr("2001:db8::1", "dual"),
            addr("10.0.0.2", "v4only"),
        ]);
        let filter = ViewFilter {
            enable_ipv6: true,
            ..Default::default()
        };
        let kept = filter_snapshot(&snap, &filter);
        assert_eq!(kept.len(), 2);
        let ips: HashSet<IpAddr> = kept.values().map(|a| a.ip).collect();
        assert!(ips.contains(&"2001:db8::1".parse::<IpAddr>().unwrap()));
        assert!(ips.contains(&"10.0.0.2".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn test_local_traffic_policy_keeps_node_local_only() {
        let mut snap = snapshot(vec![
            EndpointAddress::new("10.0.0.1".parse().unwrap(), 8080)
                .with_pod(pod_on("node-1", "a")),
            EndpointAddress::new("10.0.0.2".parse().unwrap(), 8080)
                .with_pod(pod_on("node-2", "b")),
        ]);
        snap.set.local_traffic_policy = true;

        let filter = ViewFilter {
            node: Some("node-1".into()),
            ..Default::default()
        };
        let kept = filter_snapshot(&snap, &filter);
        assert_eq!(kept.len(), 1);
        assert_eq!(
            kept.values().next().unwrap().pod.as_ref().unwrap().name,
            "a"
        );
    }

    #[test]
    fn test_local_traffic_policy_without_node_keeps_nothing() {
        let mut snap = snapshot(vec![EndpointAddress::new(
            "10.0.0.1".parse().unwrap(),
            8080,
        )
        .with_pod(pod_on("node-1", "a"))]);
        snap.set.local_traffic_policy = true;

        let kept = filter_snapshot(&snap, &ViewFilter::default());
        assert!(kept.is_empty());
    }

    #[test]
    fn test_zone_fallback_when_any_address_unhinted() {
        // Three addresses, none hinted: the documented fallback keeps
        // everything.
        let snap = snapshot(vec![
            addr("10.0.0.1", "a"),
            addr("10.0.0.2", "b"),
            addr("10.0.0.3", "c"),
        ]);
        let filter = ViewFilter {
            zone: Some("z1".into()),
            zone_filtering: true,
            ..Default::default()
        };
        assert_eq!(filter_snapshot(&snap, &filter).len(), 3);
    }

    #[test]
    fn test_zone_filtering_keeps_matching_zone() {
        let snap = snapshot(vec![
            addr("10.0.0.1", "a").with_for_zones(["z1"]),
            addr("10.0.0.2", "b").with_for_zones(["z2"]),
        ]);
        let filter = ViewFilter {
            zone: Some("z1".into()),
            zone_filtering: true,
            ..Default::default()
        };
        let kept = filter_snapshot(&snap, &filter);
        assert_eq!(kept.len(), 1);
        assert_eq!(
            kept.values().next().unwrap().pod.as_ref().unwrap().name,
            "a"
        );
    }

    #[test]
    fn test_zone_filtering_falls_back_when_zone_matches_nothing() {
        let snap = snapshot(vec![
            addr("10.0.0.1", "a").with_for_zones(["z2"]),
            addr("10.0.0.2", "b").with_for_zones(["z3"]),
        ]);
        let filter = ViewFilter {
            zone: Some("z1".into()),
            zone_filtering: true,
            ..Default::default()
        };
        assert_eq!(filter_snapshot(&snap, &filter).len(), 2);
    }

    #[test]
    fn test_zone_filtering_skipped_for_remote_clusters() {
        let mut snap = snapshot(vec![
            addr("10.0.0.1", "a").with_for_zones(["z2"]),
            addr("10.0.0.2", "b").with_for_zones(["z2"]),
        ]);
        snap.cluster = "east".to_string();
        let filter = ViewFilter {
            zone: Some("z1".into()),
            zone_filtering: true,
            ..Default::default()
        };
        assert_eq!(filter_snapshot(&snap, &filter).len(), 2);
    }

    #[test]
    fn test_diff_add_and_remove() {
        let prev = snapshot(vec![addr("10.0.0.1", "a"), addr("10.0.0.2", "b")])
            .set
            .addresses;
        let next = snapshot(vec![addr("10.0.0.2", "b"), addr("10.0.0.3", "c")])
            .set
            .addresses;

        let diff = diff_sets(&prev, &next);
        assert_eq!(diff.add.len(), 1);
        assert_eq!(diff.add[0].pod.as_ref().unwrap().name, "c");
        assert_eq!(diff.remove.len(), 1);
        assert_eq!(diff.remove[0].name, "a");
    }

    #[test]
    fn test_diff_changed_content_is_add_only() {
        let prev = snapshot(vec![addr("10.0.0.1", "a")]).set.addresses;
        let next = snapshot(vec![addr("10.0.0.1", "a").with_zone("z1")])
            .set
            .addresses;

        let diff = diff_sets(&prev, &next);
        assert_eq!(diff.add.len(), 1);
        assert!(diff.remove.is_empty());
    }

    #[test]
    fn test_diff_identical_sets_is_empty() {
        let prev = snapshot(vec![addr("10.0.0.1", "a")]).set.addresses;
        let next = snapshot(vec![addr("10.0.0.1", "a")]).set.addresses;
        assert!(diff_sets(&prev, &next).is_empty());
    }
}
