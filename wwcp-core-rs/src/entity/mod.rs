//! Charging infrastructure hierarchy
//!
//! ```text
//! RoamingNetwork
//!   └── ChargingStationOperator
//!         └── ChargingPool
//!               └── ChargingStation
//!                     └── Evse
//! ```
//!
//! Each container owns its children by id in a concurrent map. Children keep
//! a weak back-reference to their container, used only to push status
//! changes upward. Every node composes the capabilities it needs:
//! [`HasStatusSchedule`], [`HasAdminStatusSchedule`] and [`HasChildren`].

pub mod evse;
pub mod network;
pub mod operator;
pub mod pool;
pub mod station;

pub use evse::Evse;
pub use network::RoamingNetwork;
pub use operator::ChargingStationOperator;
pub use pool::ChargingPool;
pub use station::ChargingStation;

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::cascade::{
    EntityEvents, EntityRef, PropertyUpdate, Relay, StatusUpdate, StructuralChange, StructuralChangeKind,
    SubscriptionId, Subscribers,
};
use crate::error::CoreError;
use crate::schedule::{ScheduleView, SetMode, TimestampedStatus};
use crate::status::{StatusReport, StatusValue};
use crate::types::{EntityId, EventTrackingId, Timestamp};

// ============================================================================
// Capabilities
// ============================================================================

/// Anything addressable in the hierarchy
pub trait Identifiable {
    type Id: EntityId;

    fn id(&self) -> &Self::Id;

    fn entity_ref(&self) -> EntityRef;
}

/// Operational status history
pub trait HasStatusSchedule: Identifiable {
    type Status: StatusValue;

    fn status_schedule(&self) -> ScheduleView<'_, Self::Status>;

    fn status_subscribers(&self) -> &Subscribers<StatusUpdate<Self::Id, Self::Status>>;

    /// Record a status; never fails
    fn set_status(&self, value: Self::Status, timestamp: Option<Timestamp>);

    /// Replace or merge a batch of statuses, notifying at most once
    fn set_status_history(&self, values: &[TimestampedStatus<Self::Status>], mode: SetMode);

    fn status(&self) -> TimestampedStatus<Self::Status> {
        self.status_schedule().current()
    }

    fn on_status_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StatusUpdate<Self::Id, Self::Status>) + Send + Sync + 'static,
        Self: Sized,
    {
        self.status_subscribers().subscribe(callback)
    }
}

/// Administrative status history
pub trait HasAdminStatusSchedule: Identifiable {
    type AdminStatus: StatusValue;

    fn admin_status_schedule(&self) -> ScheduleView<'_, Self::AdminStatus>;

    fn admin_status_subscribers(&self) -> &Subscribers<StatusUpdate<Self::Id, Self::AdminStatus>>;

    /// Record an admin status; never fails
    fn set_admin_status(&self, value: Self::AdminStatus, timestamp: Option<Timestamp>);

    fn set_admin_status_history(&self, values: &[TimestampedStatus<Self::AdminStatus>], mode: SetMode);

    fn admin_status(&self) -> TimestampedStatus<Self::AdminStatus> {
        self.admin_status_schedule().current()
    }

    fn on_admin_status_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StatusUpdate<Self::Id, Self::AdminStatus>) + Send + Sync + 'static,
        Self: Sized,
    {
        self.admin_status_subscribers().subscribe(callback)
    }
}

/// Container of child entities
pub trait HasChildren<C: HasStatusSchedule> {
    fn child_map(&self) -> &ChildMap<C::Id, C>;

    fn children(&self) -> Vec<Arc<C>> {
        self.child_map().values()
    }

    fn child(&self, id: &C::Id) -> Option<Arc<C>> {
        self.child_map().get(id)
    }

    fn contains_child(&self, id: &C::Id) -> bool {
        self.child_map().contains(id)
    }

    fn child_count(&self) -> usize {
        self.child_map().len()
    }

    /// Distribution of the children's current operational status
    fn child_status_report(&self) -> StatusReport<C::Status>;
}

// ============================================================================
// Child map
// ============================================================================

struct Member<C> {
    entity: Arc<C>,
    relay: Relay,
}

/// Concurrent id -> child map with voted admission and removal
pub struct ChildMap<Id, C> {
    map: RwLock<HashMap<Id, Member<C>>>,
}

impl<Id: EntityId, C> ChildMap<Id, C> {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: &Id) -> Option<Arc<C>> {
        self.map.read().get(id).map(|m| m.entity.clone())
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.map.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    pub fn ids(&self) -> Vec<Id> {
        self.map.read().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<Arc<C>> {
        self.map.read().values().map(|m| m.entity.clone()).collect()
    }

    /// Vote on and commit the admission of `child`
    ///
    /// `attach` wires the child to its new container and returns the relay
    /// subscriptions to remove again on [`ChildMap::remove`]. It fails when
    /// the child already belongs to another container.
    pub fn add<F>(
        &self,
        events: &EntityEvents,
        change: &StructuralChange,
        id: Id,
        child: Arc<C>,
        attach: F,
    ) -> Result<Arc<C>, CoreError>
    where
        F: FnOnce(&Arc<C>) -> Result<Relay, CoreError>,
    {
        if self.contains(&id) {
            return Err(CoreError::DuplicateChild { id: id.to_string() });
        }

        events.propose(change, || {
            let mut map = self.map.write();
            if map.contains_key(&id) {
                return Err(CoreError::DuplicateChild { id: id.to_string() });
            }
            let relay = attach(&child)?;
            map.insert(
                id,
                Member {
                    entity: child.clone(),
                    relay,
                },
            );
            Ok(())
        })?;

        Ok(child)
    }

    /// Vote on and commit the removal of the child `id`
    pub fn remove<F>(&self, events: &EntityEvents, change: &StructuralChange, id: &Id, detach: F) -> Result<Arc<C>, CoreError>
    where
        F: FnOnce(&Arc<C>, Relay),
    {
        if !self.contains(id) {
            return Err(CoreError::UnknownChild { id: id.to_string() });
        }

        let mut removed = None;
        events.propose(change, || {
            let member = self
                .map
                .write()
                .remove(id)
                .ok_or_else(|| CoreError::UnknownChild { id: id.to_string() })?;
            detach(&member.entity, member.relay);
            removed = Some(member.entity);
            Ok(())
        })?;

        removed.ok_or_else(|| CoreError::UnknownChild { id: id.to_string() })
    }
}

impl<Id: EntityId, C> Default for ChildMap<Id, C> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub(crate) fn structural_change(
    kind: StructuralChangeKind,
    parent: EntityRef,
    child: EntityRef,
    timestamp: Timestamp,
) -> StructuralChange {
    StructuralChange {
        timestamp,
        event_id: EventTrackingId::new(),
        kind,
        parent,
        child,
    }
}

/// Point a child's back-reference at `parent` unless a live container
/// already holds it
pub(crate) fn attach_parent<P: Identifiable>(
    slot: &RwLock<Weak<P>>,
    child: &impl std::fmt::Display,
    parent: Weak<P>,
) -> Result<(), CoreError> {
    let mut current = slot.write();
    if let Some(existing) = current.upgrade() {
        return Err(CoreError::AlreadyAttached {
            id: child.to_string(),
            parent: existing.id().to_string(),
        });
    }
    *current = parent;
    Ok(())
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Publish an admin status transition as a data change so ancestors see it
pub(crate) fn publish_admin_change<Id, A: StatusValue + Serialize>(
    events: &EntityEvents,
    entity: EntityRef,
    update: &StatusUpdate<Id, A>,
) {
    events.data_changed.notify(&PropertyUpdate {
        timestamp: update.timestamp,
        event_id: update.event_id,
        entity,
        property: "admin_status".to_string(),
        old: to_json(&update.old.value),
        new: to_json(&update.new.value),
    });
}
