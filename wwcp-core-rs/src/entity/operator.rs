//! Charging station operator: owns pools and EVSE groups

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::info;

use super::{
    attach_parent, publish_admin_change, structural_change, ChargingPool, ChargingStation, ChildMap, Evse, HasAdminStatusSchedule,
    HasChildren, HasStatusSchedule, Identifiable, RoamingNetwork,
};
use crate::cascade::{
    EntityEvents, EntityRef, StatusTracker, StatusUpdate, StructuralChangeKind, Subscribers, SubscriptionId,
};
use crate::config::HistorySize;
use crate::error::CoreError;
use crate::group::EvseGroup;
use crate::schedule::{ScheduleView, SetMode, TimestampedStatus};
use crate::status::{
    aggregate_pool_statuses, ChargingPoolStatusType, ChargingStationOperatorAdminStatusType,
    ChargingStationOperatorStatusType, StatusReport,
};
use crate::types::{
    ChargingPoolId, ChargingStationId, ChargingStationOperatorId, Clock, EntityGroupId, EventTrackingId, EvseId,
    Timestamp,
};

/// Derives an operator status from its pools
pub type PoolStatusAggregation =
    Arc<dyn Fn(&StatusReport<ChargingPoolStatusType>) -> ChargingStationOperatorStatusType + Send + Sync>;

struct RegisteredGroup {
    group: Arc<EvseGroup>,
    subscription: SubscriptionId,
}

pub struct ChargingStationOperator {
    tracker: StatusTracker<ChargingStationOperatorId, ChargingStationOperatorStatusType, ChargingStationOperatorAdminStatusType>,
    events: EntityEvents,
    pools: ChildMap<ChargingPoolId, ChargingPool>,
    network: RwLock<Weak<RoamingNetwork>>,
    aggregation: RwLock<PoolStatusAggregation>,
    evse_groups: RwLock<HashMap<EntityGroupId, RegisteredGroup>>,
}

impl ChargingStationOperator {
    pub fn new(
        id: ChargingStationOperatorId,
        history: HistorySize,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, CoreError> {
        if id.is_empty() {
            return Err(CoreError::EmptyId);
        }
        let aggregation: PoolStatusAggregation = Arc::new(aggregate_pool_statuses);
        Ok(Arc::new(Self {
            tracker: StatusTracker::new(id, history.status, history.admin_status, clock),
            events: EntityEvents::new(),
            pools: ChildMap::new(),
            network: RwLock::new(Weak::new()),
            aggregation: RwLock::new(aggregation),
            evse_groups: RwLock::new(HashMap::new()),
        }))
    }

    pub fn events(&self) -> &EntityEvents {
        &self.events
    }

    pub fn network(&self) -> Option<Arc<RoamingNetwork>> {
        self.network.read().upgrade()
    }

    pub(crate) fn attach_network(&self, network: Weak<RoamingNetwork>) -> Result<(), CoreError> {
        attach_parent(&self.network, self.id(), network)
    }

    pub(crate) fn detach_network(&self) {
        *self.network.write() = Weak::new();
    }

    pub fn set_status_aggregation<F>(&self, aggregation: F)
    where
        F: Fn(&StatusReport<ChargingPoolStatusType>) -> ChargingStationOperatorStatusType + Send + Sync + 'static,
    {
        *self.aggregation.write() = Arc::new(aggregation);
        self.recompute(self.tracker.clock().now(), EventTrackingId::new());
    }

    // ------------------------------------------------------------------------
    // Pools
    // ------------------------------------------------------------------------

    pub fn add_pool(self: &Arc<Self>, pool: Arc<ChargingPool>) -> Result<Arc<ChargingPool>, CoreError> {
        let now = self.tracker.clock().now();
        let change = structural_change(StructuralChangeKind::Added, self.entity_ref(), pool.entity_ref(), now);

        let pool = self.pools.add(&self.events, &change, pool.id().clone(), pool, |pool| {
            pool.attach_operator(Arc::downgrade(self))?;
            Ok(pool.events().relay_to(Arc::downgrade(self), ChargingStationOperator::events))
        })?;

        info!("{}: added pool {}", self.id(), pool.id());
        self.recompute(now, change.event_id);
        Ok(pool)
    }

    pub fn remove_pool(self: &Arc<Self>, id: &ChargingPoolId) -> Result<Arc<ChargingPool>, CoreError> {
        let now = self.tracker.clock().now();
        let change = structural_change(
            StructuralChangeKind::Removed,
            self.entity_ref(),
            EntityRef::ChargingPool(id.clone()),
            now,
        );

        let pool = self.pools.remove(&self.events, &change, id, |pool, relay| {
            pool.events().detach(relay);
            pool.detach_operator();
        })?;

        info!("{}: removed pool {}", self.id(), pool.id());
        self.recompute(now, change.event_id);
        Ok(pool)
    }

    pub fn pool(&self, id: &ChargingPoolId) -> Option<Arc<ChargingPool>> {
        self.pools.get(id)
    }

    pub fn pools(&self) -> Vec<Arc<ChargingPool>> {
        self.pools.values()
    }

    pub fn contains_pool(&self, id: &ChargingPoolId) -> bool {
        self.pools.contains(id)
    }

    pub fn station(&self, id: &ChargingStationId) -> Option<Arc<ChargingStation>> {
        self.pools.values().iter().find_map(|pool| pool.station(id))
    }

    pub fn evse(&self, id: &EvseId) -> Option<Arc<Evse>> {
        self.pools.values().iter().find_map(|pool| pool.evse(id))
    }

    pub fn evses(&self) -> Vec<Arc<Evse>> {
        self.pools.values().iter().flat_map(|pool| pool.evses()).collect()
    }

    // ------------------------------------------------------------------------
    // EVSE groups
    // ------------------------------------------------------------------------

    /// Register a group and offer it every EVSE of this operator
    ///
    /// EVSEs added later anywhere below the operator are offered as well.
    pub fn add_evse_group(self: &Arc<Self>, group: Arc<EvseGroup>) -> Result<Arc<EvseGroup>, CoreError> {
        let mut groups = self.evse_groups.write();
        if groups.contains_key(group.id()) {
            return Err(CoreError::DuplicateChild {
                id: group.id().to_string(),
            });
        }

        let admitted = self.evses().into_iter().filter(|evse| group.add(evse.clone())).count();

        let operator = Arc::downgrade(self);
        let weak_group = Arc::downgrade(&group);
        let subscription = self.events.structure_changed.subscribe(move |change| {
            if change.kind != StructuralChangeKind::Added {
                return;
            }
            let (Some(operator), Some(group)) = (operator.upgrade(), weak_group.upgrade()) else {
                return;
            };
            for evse in operator.evses_below(&change.child) {
                group.add(evse);
            }
        });

        info!(
            "{}: registered EVSE group {} ({} of {} EVSEs admitted)",
            self.id(),
            group.id(),
            admitted,
            self.evses().len()
        );
        groups.insert(
            group.id().clone(),
            RegisteredGroup {
                group: group.clone(),
                subscription,
            },
        );
        Ok(group)
    }

    pub fn remove_evse_group(&self, id: &EntityGroupId) -> Option<Arc<EvseGroup>> {
        let registered = self.evse_groups.write().remove(id)?;
        self.events.structure_changed.unsubscribe(registered.subscription);
        Some(registered.group)
    }

    pub fn evse_group(&self, id: &EntityGroupId) -> Option<Arc<EvseGroup>> {
        self.evse_groups.read().get(id).map(|r| r.group.clone())
    }

    pub fn evse_groups(&self) -> Vec<Arc<EvseGroup>> {
        self.evse_groups.read().values().map(|r| r.group.clone()).collect()
    }

    fn evses_below(&self, entity: &EntityRef) -> Vec<Arc<Evse>> {
        match entity {
            EntityRef::Evse(id) => self.evse(id).into_iter().collect(),
            EntityRef::ChargingStation(id) => self.station(id).map(|s| s.evses()).unwrap_or_default(),
            EntityRef::ChargingPool(id) => self.pool(id).map(|p| p.evses()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub(crate) fn pool_status_changed(&self, update: &StatusUpdate<ChargingPoolId, ChargingPoolStatusType>) {
        self.recompute(update.new.timestamp, update.event_id);
    }

    fn recompute(&self, timestamp: Timestamp, event_id: EventTrackingId) {
        self.tracker.recompute_status(
            timestamp,
            event_id,
            || {
                let aggregation = self.aggregation.read().clone();
                aggregation(&self.child_status_report())
            },
            |update| self.notify_network(update),
        );
    }

    fn notify_network(&self, update: &StatusUpdate<ChargingStationOperatorId, ChargingStationOperatorStatusType>) {
        if let Some(network) = self.network() {
            network.operator_status_changed(update);
        }
    }
}

impl Identifiable for ChargingStationOperator {
    type Id = ChargingStationOperatorId;

    fn id(&self) -> &ChargingStationOperatorId {
        self.tracker.id()
    }

    fn entity_ref(&self) -> EntityRef {
        EntityRef::ChargingStationOperator(self.id().clone())
    }
}

impl HasStatusSchedule for ChargingStationOperator {
    type Status = ChargingStationOperatorStatusType;

    fn status_schedule(&self) -> ScheduleView<'_, ChargingStationOperatorStatusType> {
        self.tracker.status_schedule()
    }

    fn status_subscribers(
        &self,
    ) -> &Subscribers<StatusUpdate<ChargingStationOperatorId, ChargingStationOperatorStatusType>> {
        self.tracker.status_changed()
    }

    fn set_status(&self, value: ChargingStationOperatorStatusType, timestamp: Option<Timestamp>) {
        self.tracker
            .set_status(value, timestamp, None, |update| self.notify_network(update));
    }

    fn set_status_history(&self, values: &[TimestampedStatus<ChargingStationOperatorStatusType>], mode: SetMode) {
        self.tracker
            .set_status_values(values, mode, None, |update| self.notify_network(update));
    }
}

impl HasAdminStatusSchedule for ChargingStationOperator {
    type AdminStatus = ChargingStationOperatorAdminStatusType;

    fn admin_status_schedule(&self) -> ScheduleView<'_, ChargingStationOperatorAdminStatusType> {
        self.tracker.admin_status_schedule()
    }

    fn admin_status_subscribers(
        &self,
    ) -> &Subscribers<StatusUpdate<ChargingStationOperatorId, ChargingStationOperatorAdminStatusType>> {
        self.tracker.admin_status_changed()
    }

    fn set_admin_status(&self, value: ChargingStationOperatorAdminStatusType, timestamp: Option<Timestamp>) {
        self.tracker.set_admin_status(value, timestamp, None, |update| {
            publish_admin_change(&self.events, self.entity_ref(), update);
        });
    }

    fn set_admin_status_history(&self, values: &[TimestampedStatus<ChargingStationOperatorAdminStatusType>], mode: SetMode) {
        self.tracker.set_admin_status_values(values, mode, None, |update| {
            publish_admin_change(&self.events, self.entity_ref(), update);
        });
    }
}

impl HasChildren<ChargingPool> for ChargingStationOperator {
    fn child_map(&self) -> &ChildMap<ChargingPoolId, ChargingPool> {
        &self.pools
    }

    fn child_status_report(&self) -> StatusReport<ChargingPoolStatusType> {
        StatusReport::new(self.id().as_str(), self.pools.values().iter().map(|pool| pool.status().value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::EvseStatusType;
    use crate::types::ManualClock;

    struct Fixture {
        clock: Arc<dyn Clock>,
        operator: Arc<ChargingStationOperator>,
        pool: Arc<ChargingPool>,
        station: Arc<ChargingStation>,
    }

    fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let operator =
            ChargingStationOperator::new(ChargingStationOperatorId::new("DE*GEF"), HistorySize::default(), clock.clone())
                .unwrap();
        let pool = operator
            .add_pool(ChargingPool::new(ChargingPoolId::new("P1"), HistorySize::default(), clock.clone()).unwrap())
            .unwrap();
        let station = pool
            .add_station(
                ChargingStation::new(ChargingStationId::new("S1"), HistorySize::default(), clock.clone()).unwrap(),
            )
            .unwrap();
        Fixture {
            clock,
            operator,
            pool,
            station,
        }
    }

    fn evse(id: &str, clock: &Arc<dyn Clock>) -> Arc<Evse> {
        Evse::new(EvseId::new(id), HistorySize::default(), clock.clone()).unwrap()
    }

    #[test]
    fn test_lookup_through_pools() {
        let f = fixture();
        f.station.add_evse(evse("E1", &f.clock)).unwrap();

        assert!(f.operator.contains_pool(&ChargingPoolId::new("P1")));
        assert!(f.operator.station(&ChargingStationId::new("S1")).is_some());
        assert!(f.operator.evse(&EvseId::new("E1")).is_some());
        assert_eq!(f.operator.evses().len(), 1);
        assert_eq!(f.operator.child_count(), 1);
        assert!(Arc::ptr_eq(&f.pool.operator().unwrap(), &f.operator));
    }

    #[test]
    fn test_status_reaches_operator() {
        let f = fixture();
        let e1 = f.station.add_evse(evse("E1", &f.clock)).unwrap();

        e1.set_status(EvseStatusType::Available, None);
        assert_eq!(f.pool.status().value, ChargingPoolStatusType::Available);
        assert_eq!(f.operator.status().value, ChargingStationOperatorStatusType::Available);

        e1.set_status(EvseStatusType::OutOfService, None);
        assert_eq!(f.operator.status().value, ChargingStationOperatorStatusType::Unavailable);
    }

    #[test]
    fn test_removed_pool_stops_reporting() {
        let f = fixture();
        let e1 = f.station.add_evse(evse("E1", &f.clock)).unwrap();
        e1.set_status(EvseStatusType::Available, None);

        f.operator.remove_pool(&ChargingPoolId::new("P1")).unwrap();
        assert!(f.pool.operator().is_none());
        assert_eq!(f.operator.status().value, ChargingStationOperatorStatusType::Unknown);

        e1.set_status(EvseStatusType::Faulted, None);
        assert_eq!(f.operator.status().value, ChargingStationOperatorStatusType::Unknown);
    }

    #[test]
    fn test_pool_owned_by_one_operator() {
        let f = fixture();
        let other =
            ChargingStationOperator::new(ChargingStationOperatorId::new("NL*ALF"), HistorySize::default(), f.clock.clone())
                .unwrap();

        assert!(matches!(
            other.add_pool(f.pool.clone()),
            Err(CoreError::AlreadyAttached { .. })
        ));
        assert_eq!(other.child_count(), 0);
        assert!(Arc::ptr_eq(&f.pool.operator().unwrap(), &f.operator));
    }

    #[test]
    fn test_evse_groups_receive_new_evses() {
        let f = fixture();
        f.station.add_evse(evse("E1", &f.clock)).unwrap();

        let group: Arc<EvseGroup> = EvseGroup::evse_builder(EntityGroupId::new("G1"), "all", &f.operator)
            .with_clock(f.clock.clone())
            .build()
            .unwrap();
        f.operator.add_evse_group(group.clone()).unwrap();
        assert!(group.contains_entity_id(&EvseId::new("E1")));

        f.station.add_evse(evse("E2", &f.clock)).unwrap();
        assert!(group.contains_entity_id(&EvseId::new("E2")));

        let s2 = ChargingStation::new(ChargingStationId::new("S2"), HistorySize::default(), f.clock.clone()).unwrap();
        s2.add_evse(evse("E3", &f.clock)).unwrap();
        f.pool.add_station(s2).unwrap();
        assert!(group.contains_entity_id(&EvseId::new("E3")));

        assert_eq!(
            f.operator.add_evse_group(group.clone()).err(),
            Some(CoreError::DuplicateChild { id: "G1".to_string() })
        );

        f.operator.remove_evse_group(&EntityGroupId::new("G1"));
        f.station.add_evse(evse("E4", &f.clock)).unwrap();
        assert!(!group.contains_entity_id(&EvseId::new("E4")));
    }
}
