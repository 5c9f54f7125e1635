//! Push and pull results
//!
//! A [`PushResult`] is the answer of one receiver to "send these items", a
//! [`PullResult`] the answer to "give me your items". Both are immutable and
//! can only be built through the factory named after their [`Outcome`];
//! `Partial` is produced exclusively by the reconciler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use crate::types::AuthId;

/// What happened to a push or pull
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Unspecified,
    /// Integration disabled by its administrator; nothing was attempted
    AdminDown,
    /// Reachable but currently unable to serve the request
    OutOfService,
    Success,
    /// Some receivers accepted, some did not (reconciled results only)
    Partial,
    /// Nothing to do, e.g. the filtered payload was empty
    NoOperation,
    /// Accepted for deferred transmission
    Enqueued,
    /// No answer before the deadline
    Timeout,
    /// Local state lock could not be acquired in time
    LockTimeout,
    Error,
}

impl Outcome {
    /// Outcomes that leave nothing for the caller to retry
    pub fn is_success_like(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::NoOperation | Outcome::Enqueued)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a push is handed to a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransmissionType {
    /// Send now and wait for the receiver's answer
    #[default]
    Direct,
    /// Hand over to the receiver's queue and return immediately
    Enqueue,
}

// ============================================================================
// Push
// ============================================================================

/// Result of pushing payload items of type `P` to one receiver
///
/// `R` is the type of the rejected items, usually the payload type itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(bound(serialize = "R: Serialize"))]
pub struct PushResult<P, R = P> {
    auth_id: AuthId,
    outcome: Outcome,
    description: Option<String>,
    rejected: Vec<R>,
    warnings: Vec<String>,
    runtime: Option<Duration>,
    #[serde(skip)]
    payload: PhantomData<fn() -> P>,
}

impl<P, R> PushResult<P, R> {
    pub(crate) fn from_parts(
        auth_id: AuthId,
        outcome: Outcome,
        description: Option<String>,
        rejected: Vec<R>,
        warnings: Vec<String>,
        runtime: Option<Duration>,
    ) -> Self {
        Self {
            auth_id,
            outcome,
            description,
            rejected,
            warnings,
            runtime,
            payload: PhantomData,
        }
    }

    fn new(auth_id: AuthId, outcome: Outcome, rejected: Vec<R>) -> Self {
        Self::from_parts(auth_id, outcome, None, rejected, Vec::new(), None)
    }

    pub fn unspecified(auth_id: AuthId) -> Self {
        Self::new(auth_id, Outcome::Unspecified, Vec::new())
    }

    pub fn success(auth_id: AuthId) -> Self {
        Self::new(auth_id, Outcome::Success, Vec::new())
    }

    pub fn no_operation(auth_id: AuthId) -> Self {
        Self::new(auth_id, Outcome::NoOperation, Vec::new())
    }

    pub fn enqueued(auth_id: AuthId) -> Self {
        Self::new(auth_id, Outcome::Enqueued, Vec::new())
    }

    /// `rejected` are the items that were not attempted
    pub fn admin_down(auth_id: AuthId, rejected: Vec<R>) -> Self {
        Self::new(auth_id, Outcome::AdminDown, rejected)
    }

    pub fn out_of_service(auth_id: AuthId, rejected: Vec<R>) -> Self {
        Self::new(auth_id, Outcome::OutOfService, rejected)
    }

    pub fn timeout(auth_id: AuthId, rejected: Vec<R>) -> Self {
        Self::new(auth_id, Outcome::Timeout, rejected)
    }

    pub fn lock_timeout(auth_id: AuthId, rejected: Vec<R>) -> Self {
        Self::new(auth_id, Outcome::LockTimeout, rejected)
    }

    pub fn error(auth_id: AuthId, rejected: Vec<R>, description: impl Into<String>) -> Self {
        Self::new(auth_id, Outcome::Error, rejected).with_description(description)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_runtime(mut self, runtime: Duration) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Merge the results of one fan-out into a single verdict
    pub fn flatten(auth_id: AuthId, results: impl IntoIterator<Item = Self>, runtime: Duration) -> Self {
        crate::reconcile::flatten_push(auth_id, results, runtime)
    }

    pub fn auth_id(&self) -> &AuthId {
        &self.auth_id
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn rejected(&self) -> &[R] {
        &self.rejected
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn runtime(&self) -> Option<Duration> {
        self.runtime
    }

    pub fn is_success_like(&self) -> bool {
        self.outcome.is_success_like()
    }

    pub(crate) fn into_parts(self) -> (AuthId, Outcome, Option<String>, Vec<R>, Vec<String>) {
        (self.auth_id, self.outcome, self.description, self.rejected, self.warnings)
    }
}

// ============================================================================
// Pull
// ============================================================================

/// Result of pulling items of type `T` from one receiver
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(bound(serialize = "T: Serialize"))]
pub struct PullResult<T> {
    auth_id: AuthId,
    outcome: Outcome,
    description: Option<String>,
    data: Vec<T>,
    warnings: Vec<String>,
    runtime: Option<Duration>,
}

impl<T> PullResult<T> {
    pub(crate) fn from_parts(
        auth_id: AuthId,
        outcome: Outcome,
        description: Option<String>,
        data: Vec<T>,
        warnings: Vec<String>,
        runtime: Option<Duration>,
    ) -> Self {
        Self {
            auth_id,
            outcome,
            description,
            data,
            warnings,
            runtime,
        }
    }

    fn empty(auth_id: AuthId, outcome: Outcome) -> Self {
        Self::from_parts(auth_id, outcome, None, Vec::new(), Vec::new(), None)
    }

    pub fn unspecified(auth_id: AuthId) -> Self {
        Self::empty(auth_id, Outcome::Unspecified)
    }

    pub fn success(auth_id: AuthId, data: Vec<T>) -> Self {
        Self::from_parts(auth_id, Outcome::Success, None, data, Vec::new(), None)
    }

    pub fn no_operation(auth_id: AuthId) -> Self {
        Self::empty(auth_id, Outcome::NoOperation)
    }

    pub fn admin_down(auth_id: AuthId) -> Self {
        Self::empty(auth_id, Outcome::AdminDown)
    }

    pub fn out_of_service(auth_id: AuthId) -> Self {
        Self::empty(auth_id, Outcome::OutOfService)
    }

    pub fn timeout(auth_id: AuthId) -> Self {
        Self::empty(auth_id, Outcome::Timeout)
    }

    pub fn lock_timeout(auth_id: AuthId) -> Self {
        Self::empty(auth_id, Outcome::LockTimeout)
    }

    pub fn error(auth_id: AuthId, description: impl Into<String>) -> Self {
        Self::empty(auth_id, Outcome::Error).with_description(description)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_runtime(mut self, runtime: Duration) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn flatten(auth_id: AuthId, results: impl IntoIterator<Item = Self>, runtime: Duration) -> Self {
        crate::reconcile::flatten_pull(auth_id, results, runtime)
    }

    pub fn auth_id(&self) -> &AuthId {
        &self.auth_id
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn runtime(&self) -> Option<Duration> {
        self.runtime
    }

    pub fn is_success_like(&self) -> bool {
        self.outcome.is_success_like()
    }

    pub(crate) fn into_parts(self) -> (AuthId, Outcome, Option<String>, Vec<T>, Vec<String>) {
        (self.auth_id, self.outcome, self.description, self.data, self.warnings)
    }
}
