//! Per-stream update dispatch
//!
//! A `StreamDispatcher` is the fan-in point for a single `Get` RPC: one
//! or more views enqueue protocol updates into a bounded FIFO queue,
//! and the stream's send loop drains it in order. Enqueue tries a
//! non-blocking send first and then waits up to the stream send
//! timeout; when the timer fires, the overflow is counted and surfaced
//! as a `BackpressureTimeout`, which the enqueuing view answers by
//! resetting the stream so the proxy reconnects.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::proto;

use super::error::DiscoveryError;
use super::topic::EndpointTopic;
use super::view::{EndpointView, ViewConfig, ViewHandle};

/// Process-wide counters, injected so tests stay deterministic.
#[derive(Debug, Default)]
pub struct StreamCounters {
    /// Enqueues abandoned because the stream send timeout fired.
    pub queue_overflows: AtomicU64,
    /// Endpoint-profile publishes dropped on a saturated queue.
    pub profile_overflows: AtomicU64,
    /// Updates accepted into stream queues.
    pub updates_enqueued: AtomicU64,
}

impl StreamCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

pub(crate) struct DispatcherShared {
    queue: Mutex<Option<mpsc::Sender<proto::Update>>>,
    views: Mutex<Vec<ViewHandle>>,
    closed: AtomicBool,
    send_timeout: Duration,
    /// Cancelling this token tears the stream down; proxies reconnect.
    reset: CancellationToken,
    counters: Arc<StreamCounters>,
}

/// Fan-in handle for one `Get` stream. Cheap to clone; all clones share
/// the queue and view set.
#[derive(Clone)]
pub struct StreamDispatcher {
    shared: Arc<DispatcherShared>,
}

/// Receiving half of the dispatcher queue, drained by the send loop.
pub struct UpdateQueue {
    rx: mpsc::Receiver<proto::Update>,
}

impl StreamDispatcher {
    pub fn new(
        capacity: usize,
        send_timeout: Duration,
        reset: CancellationToken,
        counters: Arc<StreamCounters>,
    ) -> (Self, UpdateQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dispatcher = Self {
            shared: Arc::new(DispatcherShared {
                queue: Mutex::new(Some(tx)),
                views: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                send_timeout,
                reset,
                counters,
            }),
        };
        (dispatcher, UpdateQueue { rx })
    }

    /// Construct and register a view subscribed to `topic`. Fails with
    /// `ShuttingDown` once the dispatcher has closed.
    pub fn spawn_view(
        &self,
        topic: Arc<EndpointTopic>,
        config: ViewConfig,
    ) -> Result<ViewHandle, DiscoveryError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(DiscoveryError::ShuttingDown);
        }
        let view = EndpointView::spawn(topic, self.clone(), config)?;
        self.shared.views.lock().push(view.clone());
        Ok(view)
    }

    /// Enqueue one update for the send loop.
    ///
    /// An update with no payload is ignored. On a full queue the send
    /// waits up to the stream send timeout; when the timer fires, the
    /// overflow is counted and a `BackpressureTimeout` is returned for
    /// the caller to act on (views respond by calling `reset`).
    /// Enqueues after close or reset are no-ops.
    pub async fn enqueue(&self, update: proto::Update) -> Result<(), DiscoveryError> {
        if update.update.is_none() {
            return Ok(());
        }
        if self.shared.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let tx = { self.shared.queue.lock().as_ref().cloned() };
        let Some(tx) = tx else {
            return Ok(());
        };
        let update = match tx.try_send(update) {
            Ok(()) => {
                self.shared
                    .counters
                    .updates_enqueued
                    .fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            // Receiver gone; the stream already ended.
            Err(TrySendError::Closed(_)) => return Ok(()),
            Err(TrySendError::Full(update)) => update,
        };

        match tokio::time::timeout(self.shared.send_timeout, tx.send(update)).await {
            Ok(Ok(())) => {
                self.shared
                    .counters
                    .updates_enqueued
                    .fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                self.shared
                    .counters
                    .queue_overflows
                    .fetch_add(1, Ordering::Relaxed);
                Err(DiscoveryError::BackpressureTimeout(
                    self.shared.send_timeout,
                ))
            }
        }
    }

    /// Reset the stream: cancel the RPC so the proxy reconnects, then
    /// close. Called by views when an enqueue times out.
    pub fn reset(&self) {
        self.shared.reset.cancel();
        self.close();
    }

    /// Close the dispatcher: idempotent. Views close first, then the
    /// queue; in-flight updates already queued still drain.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let views = std::mem::take(&mut *self.shared.views.lock());
        for view in &views {
            view.close();
        }
        // Dropping the sender lets the send loop finish draining.
        self.shared.queue.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn counters(&self) -> &Arc<StreamCounters> {
        &self.shared.counters
    }

    pub(crate) fn downgrade(&self) -> Weak<DispatcherShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn from_shared(shared: Arc<DispatcherShared>) -> Self {
        Self { shared }
    }
}

impl UpdateQueue {
    /// Receive the next queued update; `None` once the dispatcher has
    /// closed and the queue drained.
    pub async fn recv(&mut self) -> Option<proto::Update> {
        self.rx.recv().await
    }

    /// Drain the queue in FIFO order, handing each update to `send`.
    /// A send error halts processing and propagates.
    pub async fn process<F, Fut, E>(mut self, mut send: F) -> Result<(), E>
    where
        F: FnMut(proto::Update) -> Fut,
        Fut: std::future::Future<Output = Result<(), E>>,
    {
        while let Some(update) = self.rx.recv().await {
            send(update).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_endpoints_update(exists: bool) -> proto::Update {
        proto::Update {
            update: Some(proto::update::Update::NoEndpoints(proto::NoEndpoints {
                exists,
            })),
        }
    }

    fn add_update(n: u32) -> proto::Update {
        proto::Update {
            update: Some(proto::update::Update::Add(proto::WeightedAddrSet {
                addrs: vec![proto::WeightedAddr {
                    weight: n,
                    ..Default::default()
                }],
                ..Default::default()
            })),
        }
    }

    fn dispatcher(capacity: usize, timeout: Duration) -> (StreamDispatcher, UpdateQueue) {
        StreamDispatcher::new(
            capacity,
            timeout,
            CancellationToken::new(),
            StreamCounters::new(),
        )
    }

    #[tokio::test]
    async fn test_process_preserves_enqueue_order() {
        let (dispatcher, queue) = dispatcher(16, Duration::from_secs(1));
        for n in 0..8 {
            dispatcher.enqueue(add_update(n)).await.unwrap();
        }
        drop(dispatcher);

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        queue
            .process(move |update| {
                let seen = Arc::clone(&seen_in);
                async move {
                    if let Some(proto::update::Update::Add(set)) = update.update {
                        seen.lock().push(set.addrs[0].weight);
                    }
                    Ok::<(), std::convert::Infallible>(())
                }
            })
            .await
            .unwrap();

        assert_eq!(*seen.lock(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_nil_update_is_ignored() {
        let (dispatcher, mut queue) = dispatcher(4, Duration::from_secs(1));
        dispatcher.enqueue(proto::Update::default()).await.unwrap();
        dispatcher.enqueue(no_endpoints_update(true)).await.unwrap();
        dispatcher.close();

        assert!(queue.recv().await.unwrap().update.is_some());
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_backpressure_timeout_surfaces_error() {
        // Capacity 1, 100ms timeout, send loop never drains.
        let reset = CancellationToken::new();
        let counters = StreamCounters::new();
        let (dispatcher, queue) = StreamDispatcher::new(
            1,
            Duration::from_millis(100),
            reset.clone(),
            Arc::clone(&counters),
        );

        // First fills the queue.
        dispatcher.enqueue(add_update(1)).await.unwrap();
        assert!(!dispatcher.is_closed());

        // Second blocks for the timeout, then surfaces the overflow.
        let result = dispatcher.enqueue(add_update(2)).await;
        assert!(matches!(
            result,
            Err(DiscoveryError::BackpressureTimeout(_))
        ));
        assert_eq!(counters.queue_overflows.load(Ordering::Relaxed), 1);

        // The caller performs the reset.
        dispatcher.reset();
        assert!(reset.is_cancelled());
        assert!(dispatcher.is_closed());

        // Subsequent enqueues are no-ops.
        dispatcher.enqueue(add_update(3)).await.unwrap();
        assert_eq!(counters.queue_overflows.load(Ordering::Relaxed), 1);

        // The queued update still drains, then the queue ends.
        let mut queue = queue;
        assert!(queue.recv().await.is_some());
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (dispatcher, mut queue) = dispatcher(4, Duration::from_secs(1));
        dispatcher.close();
        dispatcher.close();
        assert!(dispatcher.is_closed());
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_error_halts_processing() {
        let (dispatcher, queue) = dispatcher(8, Duration::from_secs(1));
        dispatcher.enqueue(add_update(1)).await.unwrap();
        dispatcher.enqueue(add_update(2)).await.unwrap();
        drop(dispatcher);

        let mut calls = 0;
        let result = queue
            .process(|_| {
                calls += 1;
                async move { Err::<(), &str>("transport closed") }
            })
            .await;
        assert_eq!(result, Err("transport closed"));
        assert_eq!(calls, 1);
    }
}
