//! Charging pool: a container of charging stations at one location

use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::info;

use super::{
    attach_parent, publish_admin_change, structural_change, ChargingStation, ChargingStationOperator, ChildMap, Evse,
    HasAdminStatusSchedule, HasChildren, HasStatusSchedule, Identifiable,
};
use crate::cascade::{EntityEvents, EntityRef, StatusTracker, StatusUpdate, StructuralChangeKind, Subscribers};
use crate::config::HistorySize;
use crate::error::CoreError;
use crate::schedule::{ScheduleView, SetMode, TimestampedStatus};
use crate::status::{
    aggregate_station_statuses, ChargingPoolAdminStatusType, ChargingPoolStatusType, ChargingStationStatusType,
    StatusReport,
};
use crate::types::{ChargingPoolId, ChargingStationId, Clock, EventTrackingId, EvseId, Timestamp};

/// Derives a pool status from its stations
pub type StationStatusAggregation =
    Arc<dyn Fn(&StatusReport<ChargingStationStatusType>) -> ChargingPoolStatusType + Send + Sync>;

pub struct ChargingPool {
    tracker: StatusTracker<ChargingPoolId, ChargingPoolStatusType, ChargingPoolAdminStatusType>,
    events: EntityEvents,
    stations: ChildMap<ChargingStationId, ChargingStation>,
    operator: RwLock<Weak<ChargingStationOperator>>,
    aggregation: RwLock<StationStatusAggregation>,
}

impl ChargingPool {
    pub fn new(id: ChargingPoolId, history: HistorySize, clock: Arc<dyn Clock>) -> Result<Arc<Self>, CoreError> {
        if id.is_empty() {
            return Err(CoreError::EmptyId);
        }
        let aggregation: StationStatusAggregation = Arc::new(aggregate_station_statuses);
        Ok(Arc::new(Self {
            tracker: StatusTracker::new(id, history.status, history.admin_status, clock),
            events: EntityEvents::new(),
            stations: ChildMap::new(),
            operator: RwLock::new(Weak::new()),
            aggregation: RwLock::new(aggregation),
        }))
    }

    pub fn events(&self) -> &EntityEvents {
        &self.events
    }

    pub fn operator(&self) -> Option<Arc<ChargingStationOperator>> {
        self.operator.read().upgrade()
    }

    pub(crate) fn attach_operator(&self, operator: Weak<ChargingStationOperator>) -> Result<(), CoreError> {
        attach_parent(&self.operator, self.id(), operator)
    }

    pub(crate) fn detach_operator(&self) {
        *self.operator.write() = Weak::new();
    }

    pub fn set_status_aggregation<F>(&self, aggregation: F)
    where
        F: Fn(&StatusReport<ChargingStationStatusType>) -> ChargingPoolStatusType + Send + Sync + 'static,
    {
        *self.aggregation.write() = Arc::new(aggregation);
        self.recompute(self.tracker.clock().now(), EventTrackingId::new());
    }

    pub fn add_station(self: &Arc<Self>, station: Arc<ChargingStation>) -> Result<Arc<ChargingStation>, CoreError> {
        let now = self.tracker.clock().now();
        let change = structural_change(StructuralChangeKind::Added, self.entity_ref(), station.entity_ref(), now);

        let station = self.stations.add(&self.events, &change, station.id().clone(), station, |station| {
            station.attach_pool(Arc::downgrade(self))?;
            Ok(station.events().relay_to(Arc::downgrade(self), ChargingPool::events))
        })?;

        info!("{}: added station {}", self.id(), station.id());
        self.recompute(now, change.event_id);
        Ok(station)
    }

    pub fn remove_station(self: &Arc<Self>, id: &ChargingStationId) -> Result<Arc<ChargingStation>, CoreError> {
        let now = self.tracker.clock().now();
        let change = structural_change(
            StructuralChangeKind::Removed,
            self.entity_ref(),
            EntityRef::ChargingStation(id.clone()),
            now,
        );

        let station = self.stations.remove(&self.events, &change, id, |station, relay| {
            station.events().detach(relay);
            station.detach_pool();
        })?;

        info!("{}: removed station {}", self.id(), station.id());
        self.recompute(now, change.event_id);
        Ok(station)
    }

    pub fn station(&self, id: &ChargingStationId) -> Option<Arc<ChargingStation>> {
        self.stations.get(id)
    }

    pub fn stations(&self) -> Vec<Arc<ChargingStation>> {
        self.stations.values()
    }

    pub fn contains_station(&self, id: &ChargingStationId) -> bool {
        self.stations.contains(id)
    }

    /// Look up an EVSE in any station of this pool
    pub fn evse(&self, id: &EvseId) -> Option<Arc<Evse>> {
        self.stations.values().iter().find_map(|station| station.evse(id))
    }

    pub fn evses(&self) -> Vec<Arc<Evse>> {
        self.stations.values().iter().flat_map(|station| station.evses()).collect()
    }

    pub(crate) fn station_status_changed(&self, update: &StatusUpdate<ChargingStationId, ChargingStationStatusType>) {
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
            |update| self.notify_operator(update),
        );
    }

    fn notify_operator(&self, update: &StatusUpdate<ChargingPoolId, ChargingPoolStatusType>) {
        if let Some(operator) = self.operator() {
            operator.pool_status_changed(update);
        }
    }
}

impl Identifiable for ChargingPool {
    type Id = ChargingPoolId;

    fn id(&self) -> &ChargingPoolId {
        self.tracker.id()
    }

    fn entity_ref(&self) -> EntityRef {
        EntityRef::ChargingPool(self.id().clone())
    }
}

impl HasStatusSchedule for ChargingPool {
    type Status = ChargingPoolStatusType;

    fn status_schedule(&self) -> ScheduleView<'_, ChargingPoolStatusType> {
        self.tracker.status_schedule()
    }

    fn status_subscribers(&self) -> &Subscribers<StatusUpdate<ChargingPoolId, ChargingPoolStatusType>> {
        self.tracker.status_changed()
    }

    fn set_status(&self, value: ChargingPoolStatusType, timestamp: Option<Timestamp>) {
        self.tracker
            .set_status(value, timestamp, None, |update| self.notify_operator(update));
    }

    fn set_status_history(&self, values: &[TimestampedStatus<ChargingPoolStatusType>], mode: SetMode) {
        self.tracker
            .set_status_values(values, mode, None, |update| self.notify_operator(update));
    }
}

impl HasAdminStatusSchedule for ChargingPool {
    type AdminStatus = ChargingPoolAdminStatusType;

    fn admin_status_schedule(&self) -> ScheduleView<'_, ChargingPoolAdminStatusType> {
        self.tracker.admin_status_schedule()
    }

    fn admin_status_subscribers(&self) -> &Subscribers<StatusUpdate<ChargingPoolId, ChargingPoolAdminStatusType>> {
        self.tracker.admin_status_changed()
    }

    fn set_admin_status(&self, value: ChargingPoolAdminStatusType, timestamp: Option<Timestamp>) {
        self.tracker.set_admin_status(value, timestamp, None, |update| {
            publish_admin_change(&self.events, self.entity_ref(), update);
        });
    }

    fn set_admin_status_history(&self, values: &[TimestampedStatus<ChargingPoolAdminStatusType>], mode: SetMode) {
        self.tracker.set_admin_status_values(values, mode, None, |update| {
            publish_admin_change(&self.events, self.entity_ref(), update);
        });
    }
}

impl HasChildren<ChargingStation> for ChargingPool {
    fn child_map(&self) -> &ChildMap<ChargingStationId, ChargingStation> {
        &self.stations
    }

    fn child_status_report(&self) -> StatusReport<ChargingStationStatusType> {
        StatusReport::new(
            self.id().as_str(),
            self.stations.values().iter().map(|station| station.status().value),
        )
    }
}
