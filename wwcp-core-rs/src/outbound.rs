//! Outbound EVSE status queue
//!
//! Status setters must not wait for network I/O. The queue subscribes to EVSE
//! status changes, forwards every update into an unbounded channel and lets a
//! background task push whatever has accumulated to the fan-out driver.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cascade::{EvseStatusUpdate, SubscriptionId};
use crate::entity::{Evse, HasStatusSchedule};
use crate::error::ReceiverError;
use crate::fanout::FanOut;
use crate::push::PushResult;
use crate::types::AuthId;

/// Background pusher for EVSE status updates
pub struct StatusUpdateQueue {
    sender: mpsc::UnboundedSender<EvseStatusUpdate>,
    worker: JoinHandle<usize>,
}

impl StatusUpdateQueue {
    /// Spawn the worker; `on_result` receives the reconciled result of
    /// every batch
    pub fn start<F>(fanout: FanOut<EvseStatusUpdate>, auth_id: AuthId, on_result: F) -> Self
    where
        F: Fn(PushResult<EvseStatusUpdate>) + Send + Sync + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<EvseStatusUpdate>();

        let worker = tokio::spawn(async move {
            let mut batches = 0;
            while let Some(first) = receiver.recv().await {
                let mut batch = vec![first];
                while let Ok(update) = receiver.try_recv() {
                    batch.push(update);
                }
                debug!("pushing batch of {} status update(s)", batch.len());
                on_result(fanout.push(auth_id.clone(), batch).await);
                batches += 1;
            }
            info!("status update queue stopped after {} batch(es)", batches);
            batches
        });

        Self { sender, worker }
    }

    /// Queue an update; fails only after shutdown
    pub fn submit(&self, update: EvseStatusUpdate) -> Result<(), ReceiverError> {
        self.sender.send(update).map_err(|_| ReceiverError::QueueClosed)
    }

    /// Forward every future status change of `evse`
    pub fn watch(&self, evse: &Evse) -> SubscriptionId {
        let sender = self.sender.clone();
        evse.on_status_changed(move |update| {
            if sender.send(update.clone()).is_err() {
                debug!("{}: status update dropped, queue closed", update.id);
            }
        })
    }

    pub fn watch_all<'a>(&self, evses: impl IntoIterator<Item = &'a Arc<Evse>>) -> Vec<SubscriptionId> {
        evses.into_iter().map(|evse| self.watch(evse)).collect()
    }

    /// Stop accepting direct submissions and wait for queued updates to be
    /// pushed
    ///
    /// Subscriptions created by [`StatusUpdateQueue::watch`] hold their own
    /// sender; unsubscribe them first or the worker keeps running. Returns
    /// the number of pushed batches, or 0 if the worker died.
    pub async fn shutdown(self) -> usize {
        drop(self.sender);
        match self.worker.await {
            Ok(batches) => batches,
            Err(e) => {
                warn!("status update queue worker failed: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistorySize, PushConfig};
    use crate::fanout::PushReceiver;
    use crate::push::Outcome;
    use crate::status::EvseStatusType;
    use crate::types::{EvseId, ManualClock, ReceiverId};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Recorder {
        id: ReceiverId,
        seen: Mutex<Vec<(EvseId, EvseStatusType)>>,
    }

    #[async_trait]
    impl PushReceiver<EvseStatusUpdate> for Recorder {
        fn id(&self) -> &ReceiverId {
            &self.id
        }

        async fn push(
            &self,
            auth_id: &AuthId,
            items: Vec<EvseStatusUpdate>,
            _deadline: Duration,
        ) -> Result<PushResult<EvseStatusUpdate>, ReceiverError> {
            self.seen
                .lock()
                .extend(items.into_iter().map(|u| (u.id, u.new.value)));
            Ok(PushResult::success(auth_id.clone()))
        }

        fn enqueue(&self, _auth_id: &AuthId, _items: Vec<EvseStatusUpdate>) -> Result<(), ReceiverError> {
            Err(ReceiverError::QueueClosed)
        }
    }

    fn recorder() -> Arc<Recorder> {
        Arc::new(Recorder {
            id: ReceiverId::new("ocpi"),
            seen: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_status_changes_are_pushed() {
        let recorder = recorder();
        let fanout = FanOut::<EvseStatusUpdate>::new(&PushConfig::default()).with_receiver(recorder.clone());

        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let queue = StatusUpdateQueue::start(fanout, AuthId::new("hub"), move |result| {
            let _ = results_tx.send(result.outcome());
        });

        let evse = Evse::new(EvseId::new("E1"), HistorySize::default(), Arc::new(ManualClock::new(0))).unwrap();
        let subscription = queue.watch(&evse);
        evse.set_status(EvseStatusType::Available, None);
        evse.set_status(EvseStatusType::Occupied, None);

        let mut pushed = 0;
        while pushed < 2 {
            assert_eq!(results_rx.recv().await, Some(Outcome::Success));
            pushed = recorder.seen.lock().len();
        }

        evse.status_subscribers().unsubscribe(subscription);
        assert!(queue.shutdown().await >= 1);
        assert_eq!(
            *recorder.seen.lock(),
            vec![
                (EvseId::new("E1"), EvseStatusType::Available),
                (EvseId::new("E1"), EvseStatusType::Occupied),
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_after_failed_report() {
        let recorder = recorder();
        let fanout = FanOut::<EvseStatusUpdate>::new(&PushConfig::default()).with_receiver(recorder.clone());
        let queue = StatusUpdateQueue::start(fanout, AuthId::new("hub"), |_| panic!("report sink gone"));

        let evse = Evse::new(EvseId::new("E1"), HistorySize::default(), Arc::new(ManualClock::new(0))).unwrap();
        let subscription = queue.watch(&evse);
        evse.set_status(EvseStatusType::Faulted, None);
        evse.status_subscribers().unsubscribe(subscription);

        assert_eq!(queue.shutdown().await, 0);
        assert_eq!(*recorder.seen.lock(), vec![(EvseId::new("E1"), EvseStatusType::Faulted)]);
    }
}
