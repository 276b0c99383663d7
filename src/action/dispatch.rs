//! Action dispatch
//!
//! Each inbound message is decoded and applied on its own task, so a slow
//! store call for one message never holds up the intake. A semaphore bounds
//! how many actions are in flight at once.

use super::decode::decode;
use crate::controller::Controller;
use crate::metrics::ControllerMetrics;

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Decodes inbound messages and hands them to the controller
#[derive(Clone)]
pub struct Dispatcher {
    controller: Arc<Controller>,
    permits: Arc<Semaphore>,
    metrics: ControllerMetrics,
}

impl Dispatcher {
    /// Create a dispatcher allowing `max_in_flight` concurrent actions
    pub fn new(controller: Arc<Controller>, max_in_flight: usize, metrics: ControllerMetrics) -> Self {
        Self {
            controller,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            metrics,
        }
    }

    /// Decode `payload` and spawn its action.
    ///
    /// Returns the task handle, or `None` when the message was dropped. Waits
    /// for a free slot when `max_in_flight` actions are already running.
    pub async fn handle(&self, payload: &[u8]) -> Option<JoinHandle<()>> {
        let action = match decode(payload) {
            Ok(action) => action,
            Err(e) => {
                self.metrics.record_decode_failure(e.reason_label());
                if e.is_ignorable() {
                    info!(error = %e, "Ignoring message");
                } else {
                    warn!(error = %e, body = %String::from_utf8_lossy(payload), "Dropping malformed message");
                }
                return None;
            }
        };

        let action_id = Uuid::new_v4();
        let kind = action.kind();
        self.metrics.record_action(kind);
        info!(%action_id, action = kind, ips = ?action.ips(), "Action received");

        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(%action_id, "Dispatcher closed, action dropped");
                return None;
            }
        };

        let controller = Arc::clone(&self.controller);
        let span = info_span!("action", %action_id, action = kind);
        Some(tokio::spawn(
            async move {
                let _permit = permit;
                controller.apply(action).await;
            }
            .instrument(span),
        ))
    }

    /// Actions that may still start before `handle` has to wait
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiry::ExpiryScheduler;
    use crate::shard::ShardPool;
    use crate::store::MemorySetStore;

    async fn dispatcher(store: &Arc<MemorySetStore>, max_in_flight: usize) -> (Dispatcher, Arc<Controller>, ExpiryScheduler) {
        let metrics = ControllerMetrics::detached();
        let pool = ShardPool::new("blocklist", "blocklist_all", 2, store.clone(), metrics.clone()).unwrap();
        pool.ensure_shards().await.unwrap();
        let (scheduler, expiry) = ExpiryScheduler::new(metrics.clone());
        let controller = Arc::new(Controller::new(pool, expiry, metrics.clone()));
        (
            Dispatcher::new(Arc::clone(&controller), max_in_flight, metrics),
            controller,
            scheduler,
        )
    }

    #[tokio::test]
    async fn valid_message_is_applied() {
        let store = Arc::new(MemorySetStore::new());
        let (dispatcher, controller, _scheduler) = dispatcher(&store, 4).await;

        let task = dispatcher
            .handle(b"action_type=add&ip=10.0.0.1,10.0.0.2&timeout=60")
            .await
            .expect("action spawned");
        task.await.unwrap();

        assert!(store.contains("blocklist0", "10.0.0.1"));
        assert!(store.contains("blocklist0", "10.0.0.2"));
        assert_eq!(controller.registry().len(), 2);
    }

    #[tokio::test]
    async fn unknown_and_malformed_messages_are_dropped() {
        let store = Arc::new(MemorySetStore::new());
        let (dispatcher, controller, _scheduler) = dispatcher(&store, 4).await;

        assert!(dispatcher.handle(b"action_type=explode&ip=10.0.0.1").await.is_none());
        assert!(dispatcher.handle(b"action_type=add&ip=10.0.0.1").await.is_none());
        assert!(dispatcher.handle(b"%%%").await.is_none());
        assert!(controller.registry().is_empty());
    }

    #[tokio::test]
    async fn permits_are_returned_after_each_action() {
        let store = Arc::new(MemorySetStore::new());
        let (dispatcher, controller, _scheduler) = dispatcher(&store, 1).await;

        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            let body = format!("action_type=add&ip={ip}&timeout=60");
            dispatcher.handle(body.as_bytes()).await.unwrap().await.unwrap();
        }
        assert_eq!(dispatcher.available_slots(), 1);
        assert_eq!(controller.registry().len(), 3);
    }

    #[tokio::test]
    async fn zero_concurrency_still_makes_progress() {
        let store = Arc::new(MemorySetStore::new());
        let (dispatcher, _controller, _scheduler) = dispatcher(&store, 0).await;
        assert_eq!(dispatcher.available_slots(), 1);

        dispatcher.handle(b"action_type=clear").await.unwrap().await.unwrap();
    }
}
