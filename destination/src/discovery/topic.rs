//! Endpoint topics
//!
//! An `EndpointTopic` fans one publisher's snapshots out to any number
//! of subscribing views. Delivery is pull-based and coalescing: each
//! subscriber owns a capacity-1 notification channel, `publish` performs
//! a non-blocking send on it, and the subscriber reads the latest
//! snapshot with `latest()` when it gets around to draining. A busy
//! subscriber therefore sees only the most recent state, never a
//! backlog of intermediate sets.
//!
//! Topics are created lazily by the `TopicRegistry` on first use and
//! retained for the process lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::address::{AddressSet, AddressSnapshot, ServiceKey};
use super::error::DiscoveryError;

/// State behind the topic mutex: the snapshot pointer and the
/// subscriber table. Nothing here is held across an await.
struct TopicState {
    latest: Option<Arc<AddressSnapshot>>,
    version: u64,
    subscribers: HashMap<u64, mpsc::Sender<()>>,
    next_subscriber_id: u64,
    closed: bool,
}

/// Snapshot publisher for a single (cluster, service, port) pairing.
pub struct EndpointTopic {
    key: ServiceKey,
    cluster: String,
    state: Mutex<TopicState>,
}

impl EndpointTopic {
    pub fn new(key: ServiceKey, cluster: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            key,
            cluster: cluster.into(),
            state: Mutex::new(TopicState {
                latest: None,
                version: 0,
                subscribers: HashMap::new(),
                next_subscriber_id: 0,
                closed: false,
            }),
        })
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Publish a new endpoint set, replacing the stored snapshot and
    /// nudging every subscriber.
    ///
    /// Per-subscriber sends are non-blocking: a subscriber with a
    /// pending notification keeps exactly one (coalescing), and a
    /// subscriber whose channel is gone is pruned.
    pub fn publish(&self, set: AddressSet) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.version += 1;
        let snapshot = Arc::new(AddressSnapshot {
            set,
            cluster: self.cluster.clone(),
            version: state.version,
        });
        tracing::trace!(
            topic = %self.key,
            cluster = %self.cluster,
            version = snapshot.version,
            addresses = snapshot.set.len(),
            "Published snapshot"
        );
        state.latest = Some(snapshot);
        state.subscribers.retain(|_, tx| match tx.try_send(()) {
            Ok(()) => true,
            // Already has a pending notification; last value wins.
            Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        });
    }

    /// The most recently published snapshot, if any.
    pub fn latest(&self) -> Option<Arc<AddressSnapshot>> {
        self.state.lock().latest.clone()
    }

    /// Register a subscriber and hand it its notification channel.
    ///
    /// Dropping the returned subscription unregisters it. Fails once
    /// the topic is closed.
    pub fn subscribe(self: &Arc<Self>) -> Result<TopicSubscription, DiscoveryError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DiscoveryError::ShuttingDown);
        }
        let (tx, rx) = mpsc::channel(1);
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state.subscribers.insert(id, tx);
        Ok(TopicSubscription {
            id,
            notify: rx,
            topic: Arc::downgrade(self),
        })
    }

    /// Close the topic. Every subscriber's notification channel closes
    /// exactly once; later subscribes fail with `ShuttingDown`.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    fn unsubscribe(&self, id: u64) {
        self.state.lock().subscribers.remove(&id);
    }
}

/// A live subscription to an `EndpointTopic`; unregisters on drop.
pub struct TopicSubscription {
    id: u64,
    notify: mpsc::Receiver<()>,
    topic: Weak<EndpointTopic>,
}

impl TopicSubscription {
    /// Wait for the next notification. Returns `None` once the topic
    /// has closed.
    pub async fn notified(&mut self) -> Option<()> {
        self.notify.recv().await
    }

    /// Pull the topic's current snapshot.
    pub fn latest(&self) -> Option<Arc<AddressSnapshot>> {
        self.topic.upgrade().and_then(|topic| topic.latest())
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        if let Some(topic) = self.topic.upgrade() {
            topic.unsubscribe(self.id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TopicId {
    cluster: String,
    key: ServiceKey,
}

/// Lazily creates and retains the topic for each (cluster, service).
#[derive(Default)]
pub struct TopicRegistry {
    topics: DashMap<TopicId, Arc<EndpointTopic>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the topic for a service in a cluster.
    pub fn topic(&self, cluster: &str, key: &ServiceKey) -> Arc<EndpointTopic> {
        let id = TopicId {
            cluster: cluster.to_string(),
            key: key.clone(),
        };
        self.topics
            .entry(id)
            .or_insert_with(|| EndpointTopic::new(key.clone(), cluster))
            .value()
            .clone()
    }

    /// Look up an existing topic without creating one.
    pub fn get(&self, cluster: &str, key: &ServiceKey) -> Option<Arc<EndpointTopic>> {
        let id = TopicId {
            cluster: cluster.to_string(),
            key: key.clone(),
        };
        self.topics.get(&id).map(|entry| entry.value().clone())
    }

    /// Publish an endpoint set to the matching topic, creating it if
    /// needed. This is the informer-facing entry point.
    pub fn publish(&self, cluster: &str, key: &ServiceKey, set: AddressSet) {
        self.topic(cluster, key).publish(set);
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::LOCAL_CLUSTER;
    use crate::discovery::address::EndpointAddress;
    use std::time::Duration;

    fn key() -> ServiceKey {
        ServiceKey::new("emojivoto", "web", 8080)
    }

    fn set_with(n: u8) -> AddressSet {
        let mut set = AddressSet::new(&key());
        for i in 1..=n {
            set.insert(EndpointAddress::new(
                format!("10.0.0.{i}").parse().unwrap(),
                8080,
            ));
        }
        set
    }

    #[tokio::test]
    async fn test_subscriber_notified_on_publish() {
        let topic = EndpointTopic::new(key(), LOCAL_CLUSTER);
        let mut sub = topic.subscribe().unwrap();

        topic.publish(set_with(1));

        tokio::time::timeout(Duration::from_millis(100), sub.notified())
            .await
            .unwrap()
            .unwrap();
        let snapshot = sub.latest().unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.set.len(), 1);
        assert_eq!(snapshot.cluster, LOCAL_CLUSTER);
    }

    #[tokio::test]
    async fn test_busy_subscriber_coalesces_to_latest() {
        let topic = EndpointTopic::new(key(), LOCAL_CLUSTER);
        let mut sub = topic.subscribe().unwrap();

        // Publisher emits three snapshots while the subscriber sleeps.
        topic.publish(set_with(1));
        topic.publish(set_with(3));
        topic.publish(set_with(2));

        // Exactly one pending notification, observing the latest state.
        sub.notified().await.unwrap();
        let snapshot = sub.latest().unwrap();
        assert_eq!(snapshot.version, 3);
        assert_eq!(snapshot.set.len(), 2);

        // No second notification queued.
        let pending =
            tokio::time::timeout(Duration::from_millis(50), sub.notified()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_versions_increase_monotonically() {
        let topic = EndpointTopic::new(key(), LOCAL_CLUSTER);
        let mut last = 0;
        for _ in 0..5 {
            topic.publish(set_with(1));
            let version = topic.latest().unwrap().version;
            assert!(version > last);
            last = version;
        }
    }

    #[tokio::test]
    async fn test_subscribe_after_close_fails() {
        let topic = EndpointTopic::new(key(), LOCAL_CLUSTER);
        topic.close();
        assert!(matches!(
            topic.subscribe(),
            Err(DiscoveryError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_close_terminates_subscribers() {
        let topic = EndpointTopic::new(key(), LOCAL_CLUSTER);
        let mut sub = topic.subscribe().unwrap();
        topic.close();
        assert!(sub.notified().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_unregisters_subscriber() {
        let topic = EndpointTopic::new(key(), LOCAL_CLUSTER);
        let sub = topic.subscribe().unwrap();
        assert_eq!(topic.subscriber_count(), 1);
        drop(sub);
        assert_eq!(topic.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_skips_dropped_subscribers() {
        let topic = EndpointTopic::new(key(), LOCAL_CLUSTER);
        let sub = topic.subscribe().unwrap();
        let mut live = topic.subscribe().unwrap();
        drop(sub);

        topic.publish(set_with(1));
        live.notified().await.unwrap();
        assert_eq!(topic.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_registry_reuses_topics_per_cluster() {
        let registry = TopicRegistry::new();
        let a = registry.topic(LOCAL_CLUSTER, &key());
        let b = registry.topic(LOCAL_CLUSTER, &key());
        assert!(Arc::ptr_eq(&a, &b));

        let east = registry.topic("east", &key());
        assert!(!Arc::ptr_eq(&a, &east));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_registry_publish_creates_topic() {
        let registry = TopicRegistry::new();
        registry.publish(LOCAL_CLUSTER, &key(), set_with(2));
        let topic = registry.get(LOCAL_CLUSTER, &key()).unwrap();
        assert_eq!(topic.latest().unwrap().set.len(), 2);
    }
}
