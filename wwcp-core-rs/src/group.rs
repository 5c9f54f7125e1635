//! Entity groups
//!
//! A group is a named view over a subset of leaf entities of one operator.
//! Membership is decided once, when an entity is offered via
//! [`EntityGroup::add`]: it must be pre-authorized (or the allow-list must be
//! empty) and it must satisfy the auto-include predicate. Members are never
//! re-evaluated afterwards.
//!
//! The group subscribes to every member's status changes and recomputes its
//! own status through the aggregation function, recording it only when the
//! aggregate actually changes.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::cascade::{EntityRef, StatusTracker, StatusUpdate, SubscriptionId, Subscribers};
use crate::config::HistorySize;
use crate::entity::{ChargingStationOperator, Evse, HasAdminStatusSchedule, HasStatusSchedule, Identifiable};
use crate::error::CoreError;
use crate::schedule::{ScheduleView, SetMode, TimestampedStatus};
use crate::status::{aggregate_evse_group, EvseGroupAdminStatusType, EvseGroupStatusType, StatusReport, StatusValue};
use crate::types::{system_clock, ChargingStationOperatorId, Clock, EntityGroupId, EventTrackingId, Timestamp};

/// Admission predicate evaluated when an entity is offered
pub type AutoInclude<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Group status from the members' status report
pub type GroupAggregation<S, G> = Arc<dyn Fn(&StatusReport<S>) -> G + Send + Sync>;

/// A group of EVSEs with the default EVSE group status types
pub type EvseGroup = EntityGroup<Evse, EvseGroupStatusType, EvseGroupAdminStatusType>;

struct Member<E> {
    entity: Arc<E>,
    subscription: SubscriptionId,
}

pub struct EntityGroup<E, G, A>
where
    E: HasStatusSchedule,
    G: StatusValue,
    A: StatusValue,
{
    tracker: StatusTracker<EntityGroupId, G, A>,
    name: String,
    operator_id: ChargingStationOperatorId,
    allowed: RwLock<HashSet<E::Id>>,
    auto_include: AutoInclude<E>,
    members: RwLock<HashMap<E::Id, Member<E>>>,
    aggregation: GroupAggregation<E::Status, G>,
}

/// Builder for [`EntityGroup`]
pub struct EntityGroupBuilder<E, G>
where
    E: HasStatusSchedule,
{
    id: EntityGroupId,
    name: String,
    operator_id: ChargingStationOperatorId,
    allowed: HashSet<E::Id>,
    auto_include: AutoInclude<E>,
    aggregation: GroupAggregation<E::Status, G>,
    history: HistorySize,
    clock: Arc<dyn Clock>,
}

impl<E, G> EntityGroupBuilder<E, G>
where
    E: HasStatusSchedule + Send + Sync + 'static,
    G: StatusValue,
{
    /// Pre-authorize member ids
    pub fn with_allowed_ids(mut self, ids: impl IntoIterator<Item = E::Id>) -> Self {
        self.allowed.extend(ids);
        self
    }

    pub fn with_auto_include<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.auto_include = Arc::new(predicate);
        self
    }

    pub fn with_history(mut self, history: HistorySize) -> Self {
        self.history = history;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build<A: StatusValue>(self) -> Result<Arc<EntityGroup<E, G, A>>, CoreError> {
        if self.id.is_empty() {
            return Err(CoreError::EmptyId);
        }
        if self.name.trim().is_empty() {
            return Err(CoreError::EmptyName);
        }
        Ok(Arc::new(EntityGroup {
            tracker: StatusTracker::new(
                self.id,
                self.history.status,
                self.history.admin_status,
                self.clock,
            ),
            name: self.name,
            operator_id: self.operator_id,
            allowed: RwLock::new(self.allowed),
            auto_include: self.auto_include,
            members: RwLock::new(HashMap::new()),
            aggregation: self.aggregation,
        }))
    }
}

impl<E, G, A> EntityGroup<E, G, A>
where
    E: HasStatusSchedule + Send + Sync + 'static,
    G: StatusValue,
    A: StatusValue,
{
    /// Start building a group owned by `operator`
    ///
    /// The defaults admit every offered entity and keep
    /// [`HistorySize::default`] entries on the system clock.
    pub fn builder<F>(
        id: EntityGroupId,
        name: impl Into<String>,
        operator: &ChargingStationOperator,
        aggregation: F,
    ) -> EntityGroupBuilder<E, G>
    where
        F: Fn(&StatusReport<E::Status>) -> G + Send + Sync + 'static,
    {
        EntityGroupBuilder {
            id,
            name: name.into(),
            operator_id: operator.id().clone(),
            allowed: HashSet::new(),
            auto_include: Arc::new(|_| true),
            aggregation: Arc::new(aggregation),
            history: HistorySize::default(),
            clock: system_clock(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operator_id(&self) -> &ChargingStationOperatorId {
        &self.operator_id
    }

    /// Offer `entity` for membership
    ///
    /// Returns whether the entity is a member afterwards. An entity that fails
    /// the gate is ignored.
    pub fn add(self: &Arc<Self>, entity: Arc<E>) -> bool {
        let id = entity.id().clone();
        {
            let allowed = self.allowed.read();
            if !allowed.is_empty() && !allowed.contains(&id) {
                debug!("{}: {} is not on the allow-list", self.id(), id);
                return false;
            }
        }
        if !(self.auto_include)(&entity) {
            debug!("{}: {} rejected by auto-include", self.id(), id);
            return false;
        }

        {
            let mut members = self.members.write();
            if members.contains_key(&id) {
                return true;
            }
            let group = Arc::downgrade(self);
            let subscription = entity.status_subscribers().subscribe(move |update| {
                if let Some(group) = group.upgrade() {
                    group.recompute(update.new.timestamp, update.event_id);
                }
            });
            members.insert(id.clone(), Member { entity, subscription });
        }

        debug!("{}: admitted {}", self.id(), id);
        self.recompute(self.tracker.clock().now(), EventTrackingId::new());
        true
    }

    /// Pre-authorize a future member by id
    pub fn add_id(&self, id: E::Id) -> &Self {
        self.allowed.write().insert(id);
        self
    }

    /// Remove a member and stop following its status
    pub fn remove(&self, id: &E::Id) -> Option<Arc<E>> {
        let member = self.members.write().remove(id)?;
        member.entity.status_subscribers().unsubscribe(member.subscription);
        self.recompute(self.tracker.clock().now(), EventTrackingId::new());
        Some(member.entity)
    }

    pub fn contains_entity(&self, entity: &E) -> bool {
        self.contains_entity_id(entity.id())
    }

    pub fn contains_entity_id(&self, id: &E::Id) -> bool {
        self.members.read().contains_key(id)
    }

    pub fn is_allowed(&self, id: &E::Id) -> bool {
        let allowed = self.allowed.read();
        allowed.is_empty() || allowed.contains(id)
    }

    pub fn members(&self) -> Vec<Arc<E>> {
        self.members.read().values().map(|m| m.entity.clone()).collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.read().len()
    }

    pub fn status_report(&self) -> StatusReport<E::Status> {
        StatusReport::new(
            self.id().as_str(),
            self.members.read().values().map(|m| m.entity.status().value),
        )
    }

    fn recompute(&self, timestamp: Timestamp, event_id: EventTrackingId) {
        self.tracker.recompute_status(
            timestamp,
            event_id,
            || (self.aggregation)(&self.status_report()),
            |_| {},
        );
    }
}

impl<E, G, A> Identifiable for EntityGroup<E, G, A>
where
    E: HasStatusSchedule,
    G: StatusValue,
    A: StatusValue,
{
    type Id = EntityGroupId;

    fn id(&self) -> &EntityGroupId {
        self.tracker.id()
    }

    fn entity_ref(&self) -> EntityRef {
        EntityRef::EntityGroup(self.id().clone())
    }
}

impl<E, G, A> HasStatusSchedule for EntityGroup<E, G, A>
where
    E: HasStatusSchedule,
    G: StatusValue,
    A: StatusValue,
{
    type Status = G;

    fn status_schedule(&self) -> ScheduleView<'_, G> {
        self.tracker.status_schedule()
    }

    fn status_subscribers(&self) -> &Subscribers<StatusUpdate<EntityGroupId, G>> {
        self.tracker.status_changed()
    }

    /// Overrides the derived status until the next member change
    fn set_status(&self, value: G, timestamp: Option<Timestamp>) {
        self.tracker.set_status(value, timestamp, None, |_| {});
    }

    fn set_status_history(&self, values: &[TimestampedStatus<G>], mode: SetMode) {
        self.tracker.set_status_values(values, mode, None, |_| {});
    }
}

impl<E, G, A> HasAdminStatusSchedule for EntityGroup<E, G, A>
where
    E: HasStatusSchedule,
    G: StatusValue,
    A: StatusValue,
{
    type AdminStatus = A;

    fn admin_status_schedule(&self) -> ScheduleView<'_, A> {
        self.tracker.admin_status_schedule()
    }

    fn admin_status_subscribers(&self) -> &Subscribers<StatusUpdate<EntityGroupId, A>> {
        self.tracker.admin_status_changed()
    }

    fn set_admin_status(&self, value: A, timestamp: Option<Timestamp>) {
        self.tracker.set_admin_status(value, timestamp, None, |_| {});
    }

    fn set_admin_status_history(&self, values: &[TimestampedStatus<A>], mode: SetMode) {
        self.tracker.set_admin_status_values(values, mode, None, |_| {});
    }
}

impl EvseGroup {
    /// EVSE group builder using the default EVSE group aggregation
    pub fn evse_builder(
        id: EntityGroupId,
        name: impl Into<String>,
        operator: &ChargingStationOperator,
    ) -> EntityGroupBuilder<Evse, EvseGroupStatusType> {
        Self::builder(id, name, operator, aggregate_evse_group)
    }
}

impl<E, G, A> std::fmt::Debug for EntityGroup<E, G, A>
where
    E: HasStatusSchedule,
    G: StatusValue,
    A: StatusValue,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityGroup")
            .field("id", self.id())
            .field("name", &self.name)
            .field("operator", &self.operator_id)
            .field("members", &self.members.read().len())
            .field("status", &self.status().value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::EvseStatusType;
    use crate::types::{timestamp_from_millis, EvseId, ManualClock};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(0))
    }

    fn operator(clock: &Arc<dyn Clock>) -> Arc<ChargingStationOperator> {
        ChargingStationOperator::new(
            ChargingStationOperatorId::new("DE*GEF"),
            HistorySize::default(),
            clock.clone(),
        )
        .unwrap()
    }

    fn evse(id: &str, clock: &Arc<dyn Clock>) -> Arc<Evse> {
        Evse::new(EvseId::new(id), HistorySize::default(), clock.clone()).unwrap()
    }

    fn out_of_service_if_offline(report: &StatusReport<EvseStatusType>) -> EvseGroupStatusType {
        if report.is_empty() {
            EvseGroupStatusType::Unknown
        } else if report.any(EvseStatusType::Offline) {
            EvseGroupStatusType::OutOfService
        } else if report.all(EvseStatusType::Available) {
            EvseGroupStatusType::Available
        } else {
            EvseGroupStatusType::PartiallyAvailable
        }
    }

    #[test]
    fn test_empty_name_fails_fast() {
        let clock = clock();
        let result = EvseGroup::evse_builder(EntityGroupId::new("G1"), "  ", &operator(&clock))
            .with_clock(clock)
            .build::<EvseGroupAdminStatusType>();
        assert_eq!(result.err(), Some(CoreError::EmptyName));
    }

    #[test]
    fn test_allow_list_gate() {
        let clock = clock();
        let group: Arc<EvseGroup> = EvseGroup::evse_builder(EntityGroupId::new("G1"), "west", &operator(&clock))
            .with_allowed_ids([EvseId::new("A")])
            .with_clock(clock.clone())
            .build()
            .unwrap();

        let a = evse("A", &clock);
        let b = evse("B", &clock);

        assert!(group.add(a.clone()));
        assert!(!group.add(b.clone()));
        assert!(group.contains_entity(&a));
        assert!(!group.contains_entity_id(b.id()));

        group.add_id(EvseId::new("B"));
        assert!(group.add(b.clone()));
        assert_eq!(group.member_count(), 2);
    }

    #[test]
    fn test_predicate_gate_is_one_shot() {
        let clock = clock();
        let group: Arc<EvseGroup> = EvseGroup::evse_builder(EntityGroupId::new("G1"), "fast", &operator(&clock))
            .with_auto_include(|e: &Evse| e.max_power_kw().unwrap_or(0.0) >= 50.0)
            .with_clock(clock.clone())
            .build()
            .unwrap();

        let slow = evse("E1", &clock);
        slow.set_max_power_kw(Some(11.0));
        assert!(!group.add(slow.clone()));

        let fast = evse("E2", &clock);
        fast.set_max_power_kw(Some(150.0));
        assert!(group.add(fast.clone()));

        // no re-evaluation after admission
        fast.set_max_power_kw(Some(11.0));
        assert!(group.contains_entity(&fast));
        assert!(!group.contains_entity(&slow));
    }

    #[test]
    fn test_group_follows_member_status() {
        let clock = clock();
        let group: Arc<EvseGroup> = EvseGroup::builder(
            EntityGroupId::new("G1"),
            "hall",
            &operator(&clock),
            out_of_service_if_offline,
        )
        .with_clock(clock.clone())
        .build()
        .unwrap();

        let e1 = evse("E1", &clock);
        let e2 = evse("E2", &clock);
        e1.set_status(EvseStatusType::Available, Some(timestamp_from_millis(1)));
        e2.set_status(EvseStatusType::Offline, Some(timestamp_from_millis(1)));

        group.add(e1.clone());
        group.add(e2.clone());
        assert_eq!(group.status().value, EvseGroupStatusType::OutOfService);

        e2.set_status(EvseStatusType::Available, Some(timestamp_from_millis(5)));
        assert_eq!(group.status().value, EvseGroupStatusType::Available);
        assert_eq!(group.status().timestamp, timestamp_from_millis(5));

        group.remove(e2.id());
        e2.set_status(EvseStatusType::Offline, Some(timestamp_from_millis(6)));
        assert_eq!(group.status().value, EvseGroupStatusType::Available);
    }

    #[test]
    fn test_recompute_is_change_only() {
        let clock = clock();
        let group: Arc<EvseGroup> = EvseGroup::evse_builder(EntityGroupId::new("G1"), "hall", &operator(&clock))
            .with_clock(clock.clone())
            .build()
            .unwrap();
        let notified = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let n = notified.clone();
        group.on_status_changed(move |_| {
            n.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        let e1 = evse("E1", &clock);
        let e2 = evse("E2", &clock);
        group.add(e1.clone());
        group.add(e2.clone());
        e1.set_status(EvseStatusType::Occupied, Some(timestamp_from_millis(1)));
        e2.set_status(EvseStatusType::Reserved, Some(timestamp_from_millis(2)));

        // Unknown -> Occupied once, the reservation keeps it Occupied
        assert_eq!(group.status().value, EvseGroupStatusType::Occupied);
        assert_eq!(notified.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_admin_status_is_set_directly() {
        let clock = clock();
        let group: Arc<EvseGroup> = EvseGroup::evse_builder(EntityGroupId::new("G1"), "hall", &operator(&clock))
            .with_clock(clock)
            .build()
            .unwrap();
        group.set_admin_status(EvseGroupAdminStatusType::InternalUse, None);
        assert_eq!(group.admin_status().value, EvseGroupAdminStatusType::InternalUse);
    }
}
