//! Simulated roaming receivers
//!
//! Stand-ins for real roaming protocol adapters. Each one answers pushes
//! with a fixed behavior so every outcome of the fan-out can be observed.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use wwcp_core::{
    AuthId, EvseId, EvseStatusType, EvseStatusUpdate, PullReceiver, PullResult, PushReceiver, PushResult,
    ReceiverError, ReceiverId,
};

/// How a simulated receiver answers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    /// Accept, rejecting each item with the given probability
    Accept { reject_rate: f64 },
    /// Answer after the given delay
    Slow(Duration),
    /// Report a transport failure
    Fail,
    /// Report that its local state lock was busy
    LockTimeout,
    OutOfService,
}

pub struct SimulatedReceiver {
    id: ReceiverId,
    behavior: Behavior,
    enabled: bool,
    /// Last status accepted per EVSE
    accepted: Mutex<BTreeMap<EvseId, EvseStatusType>>,
}

impl SimulatedReceiver {
    pub fn new(id: &str, behavior: Behavior) -> Self {
        Self {
            id: ReceiverId::new(id),
            behavior,
            enabled: true,
            accepted: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn name(&self) -> &ReceiverId {
        &self.id
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.lock().len()
    }

    fn accept(&self, items: Vec<EvseStatusUpdate>, reject_rate: f64) -> Vec<EvseStatusUpdate> {
        let mut rng = rand::thread_rng();
        let mut accepted = self.accepted.lock();
        let mut rejected = Vec::new();
        for item in items {
            if rng.gen_bool(reject_rate) {
                rejected.push(item);
            } else {
                accepted.insert(item.id.clone(), item.new.value);
            }
        }
        rejected
    }
}

#[async_trait]
impl PushReceiver<EvseStatusUpdate> for SimulatedReceiver {
    fn id(&self) -> &ReceiverId {
        &self.id
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn push(
        &self,
        auth_id: &AuthId,
        items: Vec<EvseStatusUpdate>,
        _deadline: Duration,
    ) -> Result<PushResult<EvseStatusUpdate>, ReceiverError> {
        debug!("{}: received {} update(s)", self.id, items.len());
        match self.behavior {
            Behavior::Accept { reject_rate } => {
                let rejected = self.accept(items, reject_rate);
                if rejected.is_empty() {
                    Ok(PushResult::success(auth_id.clone()))
                } else {
                    let description = format!("{} update(s) refused by remote", rejected.len());
                    Ok(PushResult::error(auth_id.clone(), rejected, description))
                }
            }
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                self.accept(items, 0.0);
                Ok(PushResult::success(auth_id.clone()).with_warning("slow remote"))
            }
            Behavior::Fail => Err(ReceiverError::Transport("connection refused".to_string())),
            Behavior::LockTimeout => Ok(PushResult::lock_timeout(auth_id.clone(), items)),
            Behavior::OutOfService => Ok(PushResult::out_of_service(auth_id.clone(), items)),
        }
    }

    fn enqueue(&self, _auth_id: &AuthId, items: Vec<EvseStatusUpdate>) -> Result<(), ReceiverError> {
        match self.behavior {
            Behavior::Fail => Err(ReceiverError::QueueClosed),
            _ => {
                self.accept(items, 0.0);
                Ok(())
            }
        }
    }
}

/// Reports which EVSEs the remote currently knows about
#[async_trait]
impl PullReceiver<(EvseId, EvseStatusType)> for SimulatedReceiver {
    fn id(&self) -> &ReceiverId {
        &self.id
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn pull(
        &self,
        auth_id: &AuthId,
        _deadline: Duration,
    ) -> Result<PullResult<(EvseId, EvseStatusType)>, ReceiverError> {
        match self.behavior {
            Behavior::Fail => Err(ReceiverError::Transport("connection refused".to_string())),
            Behavior::LockTimeout => Ok(PullResult::lock_timeout(auth_id.clone())),
            Behavior::OutOfService => Ok(PullResult::out_of_service(auth_id.clone())),
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(PullResult::success(auth_id.clone(), self.snapshot()))
            }
            Behavior::Accept { .. } => Ok(PullResult::success(auth_id.clone(), self.snapshot())),
        }
    }
}

impl SimulatedReceiver {
    fn snapshot(&self) -> Vec<(EvseId, EvseStatusType)> {
        self.accepted
            .lock()
            .iter()
            .map(|(id, status)| (id.clone(), *status))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wwcp_core::{EventTrackingId, Outcome, TimestampedStatus};

    fn update(id: &str, value: EvseStatusType) -> EvseStatusUpdate {
        let now = Utc::now();
        EvseStatusUpdate {
            timestamp: now,
            event_id: EventTrackingId::new(),
            id: EvseId::new(id),
            old: TimestampedStatus::new(now, EvseStatusType::Unknown),
            new: TimestampedStatus::new(now, value),
        }
    }

    #[tokio::test]
    async fn test_accepting_receiver_remembers_status() {
        let receiver = SimulatedReceiver::new("hub", Behavior::Accept { reject_rate: 0.0 });
        let result = receiver
            .push(
                &AuthId::new("node"),
                vec![update("E1", EvseStatusType::Available)],
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(result.outcome(), Outcome::Success);
        let pulled = PullReceiver::pull(&receiver, &AuthId::new("node"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(pulled.data(), &[(EvseId::new("E1"), EvseStatusType::Available)]);
    }

    #[tokio::test]
    async fn test_rejecting_receiver_returns_items() {
        let receiver = SimulatedReceiver::new("hub", Behavior::Accept { reject_rate: 1.0 });
        let result = receiver
            .push(
                &AuthId::new("node"),
                vec![update("E1", EvseStatusType::Occupied)],
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(result.outcome(), Outcome::Error);
        assert_eq!(result.rejected().len(), 1);
        assert_eq!(receiver.accepted_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_timeout_hands_items_back() {
        let receiver = SimulatedReceiver::new("busy", Behavior::LockTimeout);
        let result = receiver
            .push(
                &AuthId::new("node"),
                vec![update("E1", EvseStatusType::Faulted)],
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(result.outcome(), Outcome::LockTimeout);
        assert_eq!(result.rejected()[0].id, EvseId::new("E1"));
    }
}
