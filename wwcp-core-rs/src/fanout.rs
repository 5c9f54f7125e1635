//! Parallel push/pull to every registered receiver
//!
//! Each receiver runs in its own task with its own deadline. A receiver that
//! fails, panics or misses the deadline only affects its own result; the
//! results are collected in registration order and merged by the
//! reconciler.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::PushConfig;
use crate::error::ReceiverError;
use crate::push::{PullResult, PushResult, TransmissionType};
use crate::types::{AuthId, ReceiverId};

/// A downstream partner that accepts pushed items
#[async_trait]
pub trait PushReceiver<P, R = P>: Send + Sync
where
    P: Send + 'static,
    R: Send + 'static,
{
    fn id(&self) -> &ReceiverId;

    /// Disabled receivers are answered with `AdminDown` without being called
    fn is_enabled(&self) -> bool {
        true
    }

    /// Whether `item` is meant for this receiver
    fn include(&self, _item: &P) -> bool {
        true
    }

    /// Send `items` and wait for the answer
    async fn push(&self, auth_id: &AuthId, items: Vec<P>, deadline: Duration) -> Result<PushResult<P, R>, ReceiverError>;

    /// Hand `items` to the receiver's own queue without waiting for delivery
    fn enqueue(&self, auth_id: &AuthId, items: Vec<P>) -> Result<(), ReceiverError>;
}

/// A downstream partner that items can be pulled from
#[async_trait]
pub trait PullReceiver<T>: Send + Sync
where
    T: Send + 'static,
{
    fn id(&self) -> &ReceiverId;

    fn is_enabled(&self) -> bool {
        true
    }

    async fn pull(&self, auth_id: &AuthId, deadline: Duration) -> Result<PullResult<T>, ReceiverError>;
}

/// Await every task, turning a panicked or cancelled task into a result
///
/// `C` is whatever the fallback needs to describe the lost task, such as the
/// items it was handed.
async fn collect<T, C>(
    tasks: Vec<(ReceiverId, C, JoinHandle<T>)>,
    failed: impl Fn(&ReceiverId, C, JoinError) -> T,
) -> Vec<T> {
    let mut pending = Vec::with_capacity(tasks.len());
    let mut handles = Vec::with_capacity(tasks.len());
    for (id, context, handle) in tasks {
        pending.push((id, context));
        handles.push(handle);
    }

    join_all(handles)
        .await
        .into_iter()
        .zip(pending)
        .map(|(joined, (id, context))| match joined {
            Ok(result) => result,
            Err(e) => {
                warn!("receiver {} task failed: {}", id, e);
                failed(&id, context, e)
            }
        })
        .collect()
}

fn task_failure(id: &ReceiverId, e: &JoinError) -> String {
    if e.is_panic() {
        format!("receiver {} panicked: {}", id, e)
    } else {
        format!("receiver {} was cancelled", id)
    }
}

// ============================================================================
// Push
// ============================================================================

/// Push driver over an ordered set of receivers
pub struct FanOut<P, R = P>
where
    P: Send + 'static,
    R: Send + 'static,
{
    receivers: Vec<Arc<dyn PushReceiver<P, R>>>,
    request_timeout: Duration,
    transmission_type: TransmissionType,
}

impl<P, R> FanOut<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: From<P> + Send + 'static,
{
    pub fn new(config: &PushConfig) -> Self {
        Self {
            receivers: Vec::new(),
            request_timeout: config.request_timeout,
            transmission_type: config.transmission_type,
        }
    }

    pub fn with_receiver(mut self, receiver: Arc<dyn PushReceiver<P, R>>) -> Self {
        self.register(receiver);
        self
    }

    pub fn register(&mut self, receiver: Arc<dyn PushReceiver<P, R>>) {
        debug!("registered push receiver {}", receiver.id());
        self.receivers.push(receiver);
    }

    pub fn receiver_ids(&self) -> Vec<ReceiverId> {
        self.receivers.iter().map(|r| r.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    /// Push with the configured transmission type and deadline
    pub async fn push(&self, auth_id: AuthId, items: Vec<P>) -> PushResult<P, R> {
        self.push_with(auth_id, items, self.transmission_type, self.request_timeout)
            .await
    }

    /// Push to every receiver and merge the results
    pub async fn push_with(
        &self,
        auth_id: AuthId,
        items: Vec<P>,
        transmission_type: TransmissionType,
        deadline: Duration,
    ) -> PushResult<P, R> {
        let started = Instant::now();
        let count = items.len();
        let results = self.push_each(&auth_id, items, transmission_type, deadline).await;
        let merged = PushResult::flatten(auth_id, results, started.elapsed());
        info!(
            "pushed {} item(s) to {} receiver(s): {} in {:?}",
            count,
            self.receivers.len(),
            merged.outcome(),
            started.elapsed()
        );
        merged
    }

    /// Per-receiver results in registration order
    ///
    /// Filtering runs inside each receiver's task. A task that dies rejects
    /// every item it was offered.
    pub async fn push_each(
        &self,
        auth_id: &AuthId,
        items: Vec<P>,
        transmission_type: TransmissionType,
        deadline: Duration,
    ) -> Vec<PushResult<P, R>> {
        let tasks = self
            .receivers
            .iter()
            .map(|receiver| {
                let receiver = receiver.clone();
                let auth_id = auth_id.clone();
                let offered = items.clone();
                let pending: Vec<R> = items.iter().cloned().map(R::from).collect();
                let id = receiver.id().clone();
                let handle = tokio::spawn(async move {
                    let selected: Vec<P> = offered.into_iter().filter(|item| receiver.include(item)).collect();
                    push_one(receiver.as_ref(), auth_id, selected, transmission_type, deadline).await
                });
                (id, pending, handle)
            })
            .collect();

        collect(tasks, |id, pending, e| PushResult::error(auth_id.clone(), pending, task_failure(id, &e))).await
    }
}

async fn push_one<P, R>(
    receiver: &dyn PushReceiver<P, R>,
    auth_id: AuthId,
    items: Vec<P>,
    transmission_type: TransmissionType,
    deadline: Duration,
) -> PushResult<P, R>
where
    P: Clone + Send + 'static,
    R: From<P> + Send + 'static,
{
    let started = Instant::now();
    let id = receiver.id();

    if !receiver.is_enabled() {
        debug!("receiver {} is disabled", id);
        return PushResult::admin_down(auth_id, items.into_iter().map(R::from).collect())
            .with_runtime(started.elapsed());
    }
    if items.is_empty() {
        return PushResult::no_operation(auth_id).with_runtime(started.elapsed());
    }

    let pending: Vec<R> = items.iter().cloned().map(R::from).collect();
    match transmission_type {
        TransmissionType::Enqueue => match receiver.enqueue(&auth_id, items) {
            Ok(()) => PushResult::enqueued(auth_id).with_runtime(started.elapsed()),
            Err(e) => {
                warn!("receiver {} could not enqueue: {}", id, e);
                PushResult::error(auth_id, pending, e.to_string()).with_runtime(started.elapsed())
            }
        },
        TransmissionType::Direct => {
            match tokio::time::timeout(deadline, receiver.push(&auth_id, items, deadline)).await {
                Ok(Ok(result)) => match result.runtime() {
                    Some(_) => result,
                    None => result.with_runtime(started.elapsed()),
                },
                Ok(Err(e)) => {
                    warn!("receiver {} failed: {}", id, e);
                    PushResult::error(auth_id, pending, e.to_string()).with_runtime(started.elapsed())
                }
                Err(_) => {
                    warn!("receiver {} did not answer within {:?}", id, deadline);
                    PushResult::timeout(auth_id, pending)
                        .with_description(format!("{} did not answer within {:?}", id, deadline))
                        .with_runtime(started.elapsed())
                }
            }
        }
    }
}

// ============================================================================
// Pull
// ============================================================================

/// Pull driver over an ordered set of receivers
pub struct PullFanOut<T>
where
    T: Send + 'static,
{
    receivers: Vec<Arc<dyn PullReceiver<T>>>,
    request_timeout: Duration,
}

impl<T> PullFanOut<T>
where
    T: Send + 'static,
{
    pub fn new(config: &PushConfig) -> Self {
        Self {
            receivers: Vec::new(),
            request_timeout: config.request_timeout,
        }
    }

    pub fn with_receiver(mut self, receiver: Arc<dyn PullReceiver<T>>) -> Self {
        self.register(receiver);
        self
    }

    pub fn register(&mut self, receiver: Arc<dyn PullReceiver<T>>) {
        debug!("registered pull receiver {}", receiver.id());
        self.receivers.push(receiver);
    }

    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    pub async fn pull(&self, auth_id: AuthId) -> PullResult<T> {
        self.pull_with(auth_id, self.request_timeout).await
    }

    pub async fn pull_with(&self, auth_id: AuthId, deadline: Duration) -> PullResult<T> {
        let started = Instant::now();
        let results = self.pull_each(&auth_id, deadline).await;
        let merged = PullResult::flatten(auth_id, results, started.elapsed());
        info!(
            "pulled {} item(s) from {} receiver(s): {} in {:?}",
            merged.data().len(),
            self.receivers.len(),
            merged.outcome(),
            started.elapsed()
        );
        merged
    }

    pub async fn pull_each(&self, auth_id: &AuthId, deadline: Duration) -> Vec<PullResult<T>> {
        let tasks = self
            .receivers
            .iter()
            .map(|receiver| {
                let receiver = receiver.clone();
                let auth_id = auth_id.clone();
                let id = receiver.id().clone();
                let handle = tokio::spawn(async move { pull_one(receiver.as_ref(), auth_id, deadline).await });
                (id, (), handle)
            })
            .collect();

        collect(tasks, |id, (), e| PullResult::error(auth_id.clone(), task_failure(id, &e))).await
    }
}

async fn pull_one<T>(receiver: &dyn PullReceiver<T>, auth_id: AuthId, deadline: Duration) -> PullResult<T>
where
    T: Send + 'static,
{
    let started = Instant::now();
    let id = receiver.id();

    if !receiver.is_enabled() {
        debug!("receiver {} is disabled", id);
        return PullResult::admin_down(auth_id).with_runtime(started.elapsed());
    }

    match tokio::time::timeout(deadline, receiver.pull(&auth_id, deadline)).await {
        Ok(Ok(result)) => match result.runtime() {
            Some(_) => result,
            None => result.with_runtime(started.elapsed()),
        },
        Ok(Err(e)) => {
            warn!("receiver {} failed: {}", id, e);
            PullResult::error(auth_id, e.to_string()).with_runtime(started.elapsed())
        }
        Err(_) => {
            warn!("receiver {} did not answer within {:?}", id, deadline);
            PullResult::timeout(auth_id)
                .with_description(format!("{} did not answer within {:?}", id, deadline))
                .with_runtime(started.elapsed())
        }
    }
}
