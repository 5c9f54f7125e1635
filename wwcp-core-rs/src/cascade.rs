//! Change propagation through the hierarchy
//!
//! Two phases:
//! - Voting: structural changes (adding or removing a child) are offered to
//!   every registered voter in registration order; the first veto wins and
//!   the change is not applied.
//! - Notification: status ticks and committed structural changes are
//!   delivered to every subscriber in registration order, synchronously with
//!   the mutation that caused them.
//!
//! A parent relays its child's votes and notifications to its own
//! broadcasters, so voting and notification travel transitively up to the
//! roaming network.

use parking_lot::{ReentrantMutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::schedule::{HeadChange, ScheduleView, SetMode, StatusSchedule, TimestampedStatus};
use crate::status::StatusValue;
use crate::types::{
    ChargingPoolId, ChargingStationId, ChargingStationOperatorId, Clock, EntityGroupId, EntityId,
    EventTrackingId, EvseId, RoamingNetworkId, Timestamp,
};

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    fn next() -> Self {
        SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// Notification phase
// ============================================================================

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered list of notification callbacks
pub struct Subscribers<E> {
    list: RwLock<Vec<(SubscriptionId, Callback<E>)>>,
}

impl<E> Subscribers<E> {
    pub fn new() -> Self {
        Self {
            list: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.list.write().push((id, Arc::new(callback)));
        id
    }

    /// Returns false if the subscription was not registered here
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut list = self.list.write();
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        list.len() != before
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    /// Deliver `event` to the subscribers registered at call time
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self.list.read().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in snapshot {
            callback(event);
        }
    }
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Voting phase
// ============================================================================

/// A voter's decision on a structural change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vote {
    Accept,
    Veto { reason: String },
}

impl Vote {
    pub fn veto(reason: impl Into<String>) -> Self {
        Vote::Veto { reason: reason.into() }
    }

    pub fn is_veto(&self) -> bool {
        matches!(self, Vote::Veto { .. })
    }
}

type Voter<E> = Arc<dyn Fn(&E) -> Vote + Send + Sync>;

/// Ordered list of voters; evaluation stops at the first veto
pub struct VoteBroadcast<E> {
    list: RwLock<Vec<(SubscriptionId, Voter<E>)>>,
}

impl<E> VoteBroadcast<E> {
    pub fn new() -> Self {
        Self {
            list: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, voter: F) -> SubscriptionId
    where
        F: Fn(&E) -> Vote + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.list.write().push((id, Arc::new(voter)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut list = self.list.write();
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        list.len() != before
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    /// Ask every voter in order; the first veto is returned unchanged
    pub fn vote(&self, event: &E) -> Vote {
        let snapshot: Vec<Voter<E>> = self.list.read().iter().map(|(_, v)| v.clone()).collect();
        snapshot
            .iter()
            .map(|voter| voter(event))
            .find(Vote::is_veto)
            .unwrap_or(Vote::Accept)
    }
}

impl<E> Default for VoteBroadcast<E> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Events
// ============================================================================

/// Reference to any node in the hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id")]
pub enum EntityRef {
    Evse(EvseId),
    ChargingStation(ChargingStationId),
    ChargingPool(ChargingPoolId),
    ChargingStationOperator(ChargingStationOperatorId),
    RoamingNetwork(RoamingNetworkId),
    EntityGroup(EntityGroupId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Evse(id) => write!(f, "evse:{}", id),
            EntityRef::ChargingStation(id) => write!(f, "station:{}", id),
            EntityRef::ChargingPool(id) => write!(f, "pool:{}", id),
            EntityRef::ChargingStationOperator(id) => write!(f, "operator:{}", id),
            EntityRef::RoamingNetwork(id) => write!(f, "network:{}", id),
            EntityRef::EntityGroup(id) => write!(f, "group:{}", id),
        }
    }
}

/// Operational or administrative status transition of one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate<Id, S> {
    /// When the notification was raised
    pub timestamp: Timestamp,
    pub event_id: EventTrackingId,
    pub id: Id,
    pub old: TimestampedStatus<S>,
    pub new: TimestampedStatus<S>,
}

pub type EvseStatusUpdate = StatusUpdate<EvseId, crate::status::EvseStatusType>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StructuralChangeKind {
    Added,
    Removed,
}

/// Proposed or committed addition/removal of a child
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuralChange {
    pub timestamp: Timestamp,
    pub event_id: EventTrackingId,
    pub kind: StructuralChangeKind,
    pub parent: EntityRef,
    pub child: EntityRef,
}

/// Change of a data property (name, max power, ...)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyUpdate {
    pub timestamp: Timestamp,
    pub event_id: EventTrackingId,
    pub entity: EntityRef,
    pub property: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

// ============================================================================
// Status tracker
// ============================================================================

/// The two status schedules of one entity and their subscribers
///
/// Mutations run under a per-entity re-entrant dispatch lock that is held
/// until every subscriber and the upward continuation have returned, so
/// subscribers of one entity observe transitions in insertion order.
pub struct StatusTracker<Id, S: StatusValue, A: StatusValue> {
    id: Id,
    status: StatusSchedule<S>,
    admin_status: StatusSchedule<A>,
    status_changed: Subscribers<StatusUpdate<Id, S>>,
    admin_status_changed: Subscribers<StatusUpdate<Id, A>>,
    dispatch: ReentrantMutex<()>,
    clock: Arc<dyn Clock>,
}

impl<Id: EntityId, S: StatusValue, A: StatusValue> StatusTracker<Id, S, A> {
    pub fn new(id: Id, status_size: usize, admin_status_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            id,
            status: StatusSchedule::new(status_size, clock.clone()),
            admin_status: StatusSchedule::new(admin_status_size, clock.clone()),
            status_changed: Subscribers::new(),
            admin_status_changed: Subscribers::new(),
            dispatch: ReentrantMutex::new(()),
            clock,
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn status_schedule(&self) -> ScheduleView<'_, S> {
        ScheduleView::new(&self.status)
    }

    pub fn admin_status_schedule(&self) -> ScheduleView<'_, A> {
        ScheduleView::new(&self.admin_status)
    }

    pub fn status_changed(&self) -> &Subscribers<StatusUpdate<Id, S>> {
        &self.status_changed
    }

    pub fn admin_status_changed(&self) -> &Subscribers<StatusUpdate<Id, A>> {
        &self.admin_status_changed
    }

    /// Insert an operational status; `upward` runs after the subscribers
    /// if the head changed, still under the dispatch lock
    pub fn set_status<F>(&self, value: S, timestamp: Option<Timestamp>, event_id: Option<EventTrackingId>, upward: F)
    where
        F: FnOnce(&StatusUpdate<Id, S>),
    {
        let _guard = self.dispatch.lock();
        let change = self.status.insert(value, timestamp);
        self.dispatch_status(change, event_id, upward);
    }

    /// Replace or merge a batch of operational statuses
    ///
    /// At most one notification fires, for the head before and after the
    /// whole batch.
    pub fn set_status_values<F>(
        &self,
        values: &[TimestampedStatus<S>],
        mode: SetMode,
        event_id: Option<EventTrackingId>,
        upward: F,
    ) where
        F: FnOnce(&StatusUpdate<Id, S>),
    {
        let _guard = self.dispatch.lock();
        let change = self.status.set(values, mode);
        self.dispatch_status(change, event_id, upward);
    }

    pub fn set_admin_status<F>(
        &self,
        value: A,
        timestamp: Option<Timestamp>,
        event_id: Option<EventTrackingId>,
        upward: F,
    ) where
        F: FnOnce(&StatusUpdate<Id, A>),
    {
        let _guard = self.dispatch.lock();
        let change = self.admin_status.insert(value, timestamp);
        self.dispatch_admin_status(change, event_id, upward);
    }

    pub fn set_admin_status_values<F>(
        &self,
        values: &[TimestampedStatus<A>],
        mode: SetMode,
        event_id: Option<EventTrackingId>,
        upward: F,
    ) where
        F: FnOnce(&StatusUpdate<Id, A>),
    {
        let _guard = self.dispatch.lock();
        let change = self.admin_status.set(values, mode);
        self.dispatch_admin_status(change, event_id, upward);
    }

    fn dispatch_status<F>(&self, change: Option<HeadChange<S>>, event_id: Option<EventTrackingId>, upward: F)
    where
        F: FnOnce(&StatusUpdate<Id, S>),
    {
        if let Some(update) = self.update_for(change, event_id) {
            debug!("{}: status {:?} -> {:?}", self.id, update.old.value, update.new.value);
            self.status_changed.notify(&update);
            upward(&update);
        }
    }

    fn dispatch_admin_status<F>(&self, change: Option<HeadChange<A>>, event_id: Option<EventTrackingId>, upward: F)
    where
        F: FnOnce(&StatusUpdate<Id, A>),
    {
        if let Some(update) = self.update_for(change, event_id) {
            debug!(
                "{}: admin status {:?} -> {:?}",
                self.id, update.old.value, update.new.value
            );
            self.admin_status_changed.notify(&update);
            upward(&update);
        }
    }

    fn update_for<V>(&self, change: Option<HeadChange<V>>, event_id: Option<EventTrackingId>) -> Option<StatusUpdate<Id, V>> {
        change.map(|change| StatusUpdate {
            timestamp: self.clock.now(),
            event_id: event_id.unwrap_or_default(),
            id: self.id.clone(),
            old: change.old,
            new: change.new,
        })
    }

    /// Recompute a derived status and insert it only if it differs
    ///
    /// `compute` runs under the dispatch lock so concurrent recomputations
    /// cannot overwrite a newer aggregate with a stale one. The entry is
    /// stamped no earlier than the current head so it always becomes the
    /// new head.
    pub fn recompute_status<C, F>(&self, timestamp: Timestamp, event_id: EventTrackingId, compute: C, upward: F)
    where
        C: FnOnce() -> S,
        F: FnOnce(&StatusUpdate<Id, S>),
    {
        let _guard = self.dispatch.lock();
        let current = self.status.current();
        let aggregated = compute();
        if aggregated == current.value {
            return;
        }
        let timestamp = timestamp.max(current.timestamp);
        self.set_status(aggregated, Some(timestamp), Some(event_id), upward);
    }
}

// ============================================================================
// Structural and data events
// ============================================================================

/// Broadcasters every node exposes for structural and data changes
pub struct EntityEvents {
    pub structure_votes: VoteBroadcast<StructuralChange>,
    pub structure_changed: Subscribers<StructuralChange>,
    pub data_changed: Subscribers<PropertyUpdate>,
    upstream_votes: VoteBroadcast<StructuralChange>,
}

/// Subscriptions a parent holds on a child's [`EntityEvents`]
#[derive(Debug, Clone, Copy)]
pub struct Relay {
    votes: SubscriptionId,
    changes: SubscriptionId,
    data: SubscriptionId,
}

impl EntityEvents {
    pub fn new() -> Self {
        Self {
            structure_votes: VoteBroadcast::new(),
            structure_changed: Subscribers::new(),
            data_changed: Subscribers::new(),
            upstream_votes: VoteBroadcast::new(),
        }
    }

    /// Forward votes and notifications published here to `upstream`
    pub fn relay_to<P>(&self, upstream: Weak<P>, events: fn(&P) -> &EntityEvents) -> Relay
    where
        P: Send + Sync + 'static,
    {
        let votes = {
            let upstream = upstream.clone();
            self.upstream_votes.subscribe(move |change| match upstream.upgrade() {
                Some(parent) => events(&parent).vote(change),
                None => Vote::Accept,
            })
        };
        let changes = {
            let upstream = upstream.clone();
            self.structure_changed.subscribe(move |change| {
                if let Some(parent) = upstream.upgrade() {
                    events(&parent).structure_changed.notify(change);
                }
            })
        };
        let data = self.data_changed.subscribe(move |update| {
            if let Some(parent) = upstream.upgrade() {
                events(&parent).data_changed.notify(update);
            }
        });
        Relay { votes, changes, data }
    }

    /// Stop forwarding to the parent that created `relay`
    pub fn detach(&self, relay: Relay) {
        self.upstream_votes.unsubscribe(relay.votes);
        self.structure_changed.unsubscribe(relay.changes);
        self.data_changed.unsubscribe(relay.data);
    }

    /// Ask this node's voters, then every ancestor's
    pub fn vote(&self, change: &StructuralChange) -> Vote {
        match self.structure_votes.vote(change) {
            Vote::Accept => self.upstream_votes.vote(change),
            veto => veto,
        }
    }

    /// Run the voting phase, then commit and notify if nobody vetoed
    pub fn propose<F>(&self, change: &StructuralChange, commit: F) -> Result<(), CoreError>
    where
        F: FnOnce() -> Result<(), CoreError>,
    {
        if let Vote::Veto { reason } = self.vote(change) {
            warn!("{:?} of {} under {} vetoed: {}", change.kind, change.child, change.parent, reason);
            return Err(CoreError::Vetoed { reason });
        }
        commit()?;
        self.structure_changed.notify(change);
        Ok(())
    }
}

impl Default for EntityEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{EvseAdminStatusType, EvseStatusType};
    use crate::types::{timestamp_from_millis, ManualClock};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn change() -> StructuralChange {
        StructuralChange {
            timestamp: timestamp_from_millis(0),
            event_id: EventTrackingId::new(),
            kind: StructuralChangeKind::Added,
            parent: EntityRef::ChargingStation(ChargingStationId::new("CS1")),
            child: EntityRef::Evse(EvseId::new("E1")),
        }
    }

    #[test]
    fn test_subscribers_fire_in_registration_order() {
        let subs: Subscribers<u32> = Subscribers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            subs.subscribe(move |v| seen.lock().push(format!("{}{}", tag, v)));
        }

        subs.notify(&1);
        assert_eq!(*seen.lock(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn test_unsubscribe() {
        let subs: Subscribers<u32> = Subscribers::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = subs.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(subs.unsubscribe(id));
        assert!(!subs.unsubscribe(id));
        subs.notify(&7);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_first_veto_wins_and_short_circuits() {
        let votes: VoteBroadcast<StructuralChange> = VoteBroadcast::new();
        let asked = Arc::new(AtomicUsize::new(0));

        let a = asked.clone();
        votes.subscribe(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
            Vote::Accept
        });
        votes.subscribe(|_| Vote::veto("first"));
        let a = asked.clone();
        votes.subscribe(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
            Vote::veto("second")
        });

        assert_eq!(votes.vote(&change()), Vote::veto("first"));
        assert_eq!(asked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_propose_skips_commit_on_veto() {
        let events = EntityEvents::new();
        let notified = Arc::new(AtomicUsize::new(0));
        let n = notified.clone();
        events.structure_changed.subscribe(move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        });
        events.structure_votes.subscribe(|_| Vote::veto("full"));

        let mut committed = false;
        let result = events.propose(&change(), || {
            committed = true;
            Ok(())
        });

        assert_eq!(result, Err(CoreError::Vetoed { reason: "full".to_string() }));
        assert!(!committed);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_relay_forwards_to_parent() {
        struct Parent {
            events: EntityEvents,
        }

        let parent = Arc::new(Parent { events: EntityEvents::new() });
        let child = EntityEvents::new();
        let relay = child.relay_to(Arc::downgrade(&parent), |p: &Parent| &p.events);

        parent.events.structure_votes.subscribe(|_| Vote::veto("parent says no"));
        assert_eq!(child.vote(&change()), Vote::veto("parent says no"));

        // own voters are asked before ancestors, even when added later
        let own = child.structure_votes.subscribe(|_| Vote::veto("child says no"));
        assert_eq!(child.vote(&change()), Vote::veto("child says no"));

        child.structure_votes.unsubscribe(own);
        child.detach(relay);
        assert_eq!(child.vote(&change()), Vote::Accept);
    }

    #[test]
    fn test_tracker_notifies_only_on_head_change() {
        let clock = Arc::new(ManualClock::new(0));
        let tracker: StatusTracker<EvseId, EvseStatusType, EvseAdminStatusType> =
            StatusTracker::new(EvseId::new("E1"), 10, 10, clock);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        tracker
            .status_changed()
            .subscribe(move |u: &EvseStatusUpdate| s.lock().push((u.old.value, u.new.value)));

        let mut upward_calls = 0;
        tracker.set_status(EvseStatusType::Available, Some(timestamp_from_millis(10)), None, |_| {
            upward_calls += 1
        });
        tracker.set_status(EvseStatusType::Available, Some(timestamp_from_millis(20)), None, |_| {
            upward_calls += 1
        });

        assert_eq!(*seen.lock(), vec![(EvseStatusType::Unknown, EvseStatusType::Available)]);
        assert_eq!(upward_calls, 1);
        assert_eq!(tracker.status_schedule().len(), 3);
    }

    #[test]
    fn test_recompute_is_change_only_and_never_behind_head() {
        let clock = Arc::new(ManualClock::new(0));
        let tracker: StatusTracker<EvseId, EvseStatusType, EvseAdminStatusType> =
            StatusTracker::new(EvseId::new("E1"), 10, 10, clock);
        tracker.set_status(EvseStatusType::Available, Some(timestamp_from_millis(500)), None, |_| {});

        tracker.recompute_status(timestamp_from_millis(100), EventTrackingId::new(), || EvseStatusType::Available, |_| {
            panic!("unchanged aggregate must not notify")
        });
        assert_eq!(tracker.status_schedule().len(), 2);

        tracker.recompute_status(timestamp_from_millis(100), EventTrackingId::new(), || EvseStatusType::Occupied, |_| {});
        let head = tracker.status_schedule().current();
        assert_eq!(head.value, EvseStatusType::Occupied);
        assert_eq!(head.timestamp, timestamp_from_millis(500));
    }
}
