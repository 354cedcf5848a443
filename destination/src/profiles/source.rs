//! Profile sources
//!
//! The informer layer publishes decoded profiles into a registry of
//! watch channels; each `GetProfile` stream subscribes to one channel,
//! or to a primary/backup pair when the proxy supplied a client
//! namespace. A source distinguishes "not reported yet" (`Pending`)
//! from "reported absent" so the fallback can wait until both inputs
//! initialize before emitting anything.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use super::Profile;

/// What a profile channel currently knows.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ProfileState {
    /// The informer has not reported for this key yet.
    #[default]
    Pending,
    /// No profile resource exists.
    Absent,
    /// A decoded profile.
    Present(Arc<Profile>),
}

impl ProfileState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ProfileState::Pending)
    }

    pub fn is_present(&self) -> bool {
        matches!(self, ProfileState::Present(_))
    }
}

/// Registry of profile channels, keyed by (namespace, profile name).
/// Channels are created lazily and retained for the process lifetime.
#[derive(Default)]
pub struct ProfileRegistry {
    entries: DashMap<(String, String), watch::Sender<ProfileState>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the profile named `name` in `namespace`, creating
    /// the channel in `Pending` state if needed.
    pub fn subscribe(&self, namespace: &str, name: &str) -> watch::Receiver<ProfileState> {
        self.entries
            .entry((namespace.to_string(), name.to_string()))
            .or_insert_with(|| watch::channel(ProfileState::default()).0)
            .subscribe()
    }

    /// Publish the informer's view of a profile; `None` records that
    /// the resource does not exist.
    pub fn publish(&self, namespace: &str, name: &str, profile: Option<Profile>) {
        let state = match profile {
            Some(profile) => ProfileState::Present(Arc::new(profile)),
            None => ProfileState::Absent,
        };
        let sender = self
            .entries
            .entry((namespace.to_string(), name.to_string()))
            .or_insert_with(|| watch::channel(ProfileState::default()).0);
        // send_replace updates the value even with no subscribers yet.
        sender.send_replace(state);
    }

}

enum SourceKind {
    Single(watch::Receiver<ProfileState>),
    Fallback {
        primary: watch::Receiver<ProfileState>,
        backup: watch::Receiver<ProfileState>,
    },
}

/// One stream's merged profile input.
pub struct ProfileSource {
    kind: SourceKind,
    primed: bool,
}

impl ProfileSource {
    pub fn single(rx: watch::Receiver<ProfileState>) -> Self {
        Self {
            kind: SourceKind::Single(rx),
            primed: false,
        }
    }

    /// Primary/backup pair: output is the primary when it holds a
    /// profile, else the backup, and nothing is emitted until both
    /// inputs have initialized past `Pending`.
    pub fn with_fallback(
        primary: watch::Receiver<ProfileState>,
        backup: watch::Receiver<ProfileState>,
    ) -> Self {
        Self {
            kind: SourceKind::Fallback { primary, backup },
            primed: false,
        }
    }

    /// Wait for the next effective state. `None` once every input
    /// channel has closed.
    pub async fn next(&mut self) -> Option<ProfileState> {
        if self.primed {
            loop {
                self.wait_changed().await.ok()?;
                if let Some(state) = self.effective() {
                    return Some(state);
                }
            }
        }
        loop {
            if let Some(state) = self.effective() {
                self.primed = true;
                return Some(state);
            }
            self.wait_changed().await.ok()?;
        }
    }

    /// The current merged state, or `None` while an input is still
    /// `Pending` (treated as not yet ready, never as empty).
    fn effective(&mut self) -> Option<ProfileState> {
        match &mut self.kind {
            SourceKind::Single(rx) => {
                let state = rx.borrow_and_update().clone();
                (!state.is_pending()).then_some(state)
            }
            SourceKind::Fallback { primary, backup } => {
                let primary = primary.borrow_and_update().clone();
                let backup = backup.borrow_and_update().clone();
                if primary.is_pending() || backup.is_pending() {
                    return None;
                }
                if primary.is_present() {
                    Some(primary)
                } else {
                    Some(backup)
                }
            }
        }
    }

    async fn wait_changed(&mut self) -> Result<(), watch::error::RecvError> {
        match &mut self.kind {
            SourceKind::Single(rx) => rx.changed().await,
            SourceKind::Fallback { primary, backup } => tokio::select! {
                changed = primary.changed() => changed,
                changed = backup.changed() => changed,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn profile_with_route(name: &str) -> Profile {
        Profile {
            routes: vec![super::super::RouteSpec::named(name)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_single_source_waits_for_initialization() {
        let registry = ProfileRegistry::new();
        let mut source = ProfileSource::single(registry.subscribe("emojivoto", "web"));

        // Nothing reported yet: next() stays pending.
        let pending = tokio::time::timeout(Duration::from_millis(50), source.next()).await;
        assert!(pending.is_err());

        registry.publish("emojivoto", "web", None);
        let mut source = ProfileSource::single(registry.subscribe("emojivoto", "web"));
        assert_eq!(source.next().await.unwrap(), ProfileState::Absent);
    }

    #[tokio::test]
    async fn test_single_source_observes_updates() {
        let registry = ProfileRegistry::new();
        registry.publish("emojivoto", "web", Some(profile_with_route("a")));
        let mut source = ProfileSource::single(registry.subscribe("emojivoto", "web"));

        assert!(source.next().await.unwrap().is_present());

        registry.publish("emojivoto", "web", Some(profile_with_route("b")));
        match source.next().await.unwrap() {
            ProfileState::Present(profile) => assert_eq!(profile.routes[0].name, "b"),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fallback_waits_for_both_inputs() {
        let registry = ProfileRegistry::new();
        let mut source = ProfileSource::with_fallback(
            registry.subscribe("client-ns", "web.emojivoto.svc.cluster.local"),
            registry.subscribe("emojivoto", "web.emojivoto.svc.cluster.local"),
        );

        // Only the backup initialized: still waiting on the primary.
        registry.publish(
            "emojivoto",
            "web.emojivoto.svc.cluster.local",
            Some(profile_with_route("backup")),
        );
        let pending = tokio::time::timeout(Duration::from_millis(50), source.next()).await;
        assert!(pending.is_err());

        // Primary reports absent: backup wins.
        registry.publish("client-ns", "web.emojivoto.svc.cluster.local", None);
        match source.next().await.unwrap() {
            ProfileState::Present(profile) => assert_eq!(profile.routes[0].name, "backup"),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fallback_prefers_primary_when_present() {
        let registry = ProfileRegistry::new();
        registry.publish("client-ns", "web.fqn", Some(profile_with_route("primary")));
        registry.publish("emojivoto", "web.fqn", Some(profile_with_route("backup")));

        let mut source = ProfileSource::with_fallback(
            registry.subscribe("client-ns", "web.fqn"),
            registry.subscribe("emojivoto", "web.fqn"),
        );
        match source.next().await.unwrap() {
            ProfileState::Present(profile) => assert_eq!(profile.routes[0].name, "primary"),
            other => panic!("unexpected state: {other:?}"),
        }

        // Primary withdrawn: output falls back.
        registry.publish("client-ns", "web.fqn", None);
        match source.next().await.unwrap() {
            ProfileState::Present(profile) => assert_eq!(profile.routes[0].name, "backup"),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_both_absent_yields_absent() {
        let registry = ProfileRegistry::new();
        registry.publish("client-ns", "web.fqn", None);
        registry.publish("emojivoto", "web.fqn", None);

        let mut source = ProfileSource::with_fallback(
            registry.subscribe("client-ns", "web.fqn"),
            registry.subscribe("emojivoto", "web.fqn"),
        );
        assert_eq!(source.next().await.unwrap(), ProfileState::Absent);
    }
}
