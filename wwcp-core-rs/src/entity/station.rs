//! Charging station: a container of EVSEs

use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::info;

use super::{
    attach_parent, publish_admin_change, structural_change, to_json, ChargingPool, ChildMap, Evse, HasAdminStatusSchedule,
    HasChildren, HasStatusSchedule, Identifiable,
};
use crate::cascade::{EntityEvents, EntityRef, PropertyUpdate, StatusTracker, StatusUpdate, StructuralChangeKind, Subscribers};
use crate::config::HistorySize;
use crate::error::CoreError;
use crate::schedule::{ScheduleView, SetMode, TimestampedStatus};
use crate::status::{
    aggregate_evse_statuses, ChargingStationAdminStatusType, ChargingStationStatusType, EvseStatusType, StatusReport,
};
use crate::types::{ChargingStationId, Clock, EventTrackingId, EvseId, Timestamp};

/// Derives a station status from its EVSEs
pub type EvseStatusAggregation =
    Arc<dyn Fn(&StatusReport<EvseStatusType>) -> ChargingStationStatusType + Send + Sync>;

pub struct ChargingStation {
    tracker: StatusTracker<ChargingStationId, ChargingStationStatusType, ChargingStationAdminStatusType>,
    events: EntityEvents,
    evses: ChildMap<EvseId, Evse>,
    pool: RwLock<Weak<ChargingPool>>,
    aggregation: RwLock<EvseStatusAggregation>,
    name: RwLock<Option<String>>,
}

impl ChargingStation {
    pub fn new(id: ChargingStationId, history: HistorySize, clock: Arc<dyn Clock>) -> Result<Arc<Self>, CoreError> {
        if id.is_empty() {
            return Err(CoreError::EmptyId);
        }
        let aggregation: EvseStatusAggregation = Arc::new(aggregate_evse_statuses);
        Ok(Arc::new(Self {
            tracker: StatusTracker::new(id, history.status, history.admin_status, clock),
            events: EntityEvents::new(),
            evses: ChildMap::new(),
            pool: RwLock::new(Weak::new()),
            aggregation: RwLock::new(aggregation),
            name: RwLock::new(None),
        }))
    }

    pub fn events(&self) -> &EntityEvents {
        &self.events
    }

    pub fn pool(&self) -> Option<Arc<ChargingPool>> {
        self.pool.read().upgrade()
    }

    pub(crate) fn attach_pool(&self, pool: Weak<ChargingPool>) -> Result<(), CoreError> {
        attach_parent(&self.pool, self.id(), pool)
    }

    pub(crate) fn detach_pool(&self) {
        *self.pool.write() = Weak::new();
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: Option<String>) {
        let old = std::mem::replace(&mut *self.name.write(), name.clone());
        if old != name {
            self.events.data_changed.notify(&PropertyUpdate {
                timestamp: self.tracker.clock().now(),
                event_id: EventTrackingId::new(),
                entity: self.entity_ref(),
                property: "name".to_string(),
                old: to_json(&old),
                new: to_json(&name),
            });
        }
    }

    /// Replace the aggregation and recompute immediately
    pub fn set_status_aggregation<F>(&self, aggregation: F)
    where
        F: Fn(&StatusReport<EvseStatusType>) -> ChargingStationStatusType + Send + Sync + 'static,
    {
        *self.aggregation.write() = Arc::new(aggregation);
        self.recompute(self.tracker.clock().now(), EventTrackingId::new());
    }

    // ------------------------------------------------------------------------
    // EVSEs
    // ------------------------------------------------------------------------

    /// Admit an EVSE unless a voter up the hierarchy vetoes it
    pub fn add_evse(self: &Arc<Self>, evse: Arc<Evse>) -> Result<Arc<Evse>, CoreError> {
        let now = self.tracker.clock().now();
        let change = structural_change(StructuralChangeKind::Added, self.entity_ref(), evse.entity_ref(), now);

        let evse = self.evses.add(&self.events, &change, evse.id().clone(), evse, |evse| {
            evse.attach_station(Arc::downgrade(self))?;
            Ok(evse.events().relay_to(Arc::downgrade(self), ChargingStation::events))
        })?;

        info!("{}: added EVSE {}", self.id(), evse.id());
        self.recompute(now, change.event_id);
        Ok(evse)
    }

    pub fn remove_evse(self: &Arc<Self>, id: &EvseId) -> Result<Arc<Evse>, CoreError> {
        let now = self.tracker.clock().now();
        let change = structural_change(
            StructuralChangeKind::Removed,
            self.entity_ref(),
            EntityRef::Evse(id.clone()),
            now,
        );

        let evse = self.evses.remove(&self.events, &change, id, |evse, relay| {
            evse.events().detach(relay);
            evse.detach_station();
        })?;

        info!("{}: removed EVSE {}", self.id(), evse.id());
        self.recompute(now, change.event_id);
        Ok(evse)
    }

    pub fn evse(&self, id: &EvseId) -> Option<Arc<Evse>> {
        self.evses.get(id)
    }

    pub fn evses(&self) -> Vec<Arc<Evse>> {
        self.evses.values()
    }

    pub fn contains_evse(&self, id: &EvseId) -> bool {
        self.evses.contains(id)
    }

    pub fn evse_count(&self) -> usize {
        self.evses.len()
    }

    // ------------------------------------------------------------------------
    // Cascade
    // ------------------------------------------------------------------------

    pub(crate) fn evse_status_changed(&self, update: &StatusUpdate<EvseId, EvseStatusType>) {
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
            |update| self.notify_pool(update),
        );
    }

    fn notify_pool(&self, update: &StatusUpdate<ChargingStationId, ChargingStationStatusType>) {
        if let Some(pool) = self.pool() {
            pool.station_status_changed(update);
        }
    }
}

impl Identifiable for ChargingStation {
    type Id = ChargingStationId;

    fn id(&self) -> &ChargingStationId {
        self.tracker.id()
    }

    fn entity_ref(&self) -> EntityRef {
        EntityRef::ChargingStation(self.id().clone())
    }
}

impl HasStatusSchedule for ChargingStation {
    type Status = ChargingStationStatusType;

    fn status_schedule(&self) -> ScheduleView<'_, ChargingStationStatusType> {
        self.tracker.status_schedule()
    }

    fn status_subscribers(&self) -> &Subscribers<StatusUpdate<ChargingStationId, ChargingStationStatusType>> {
        self.tracker.status_changed()
    }

    fn set_status(&self, value: ChargingStationStatusType, timestamp: Option<Timestamp>) {
        self.tracker
            .set_status(value, timestamp, None, |update| self.notify_pool(update));
    }

    fn set_status_history(&self, values: &[TimestampedStatus<ChargingStationStatusType>], mode: SetMode) {
        self.tracker
            .set_status_values(values, mode, None, |update| self.notify_pool(update));
    }
}

impl HasAdminStatusSchedule for ChargingStation {
    type AdminStatus = ChargingStationAdminStatusType;

    fn admin_status_schedule(&self) -> ScheduleView<'_, ChargingStationAdminStatusType> {
        self.tracker.admin_status_schedule()
    }

    fn admin_status_subscribers(&self) -> &Subscribers<StatusUpdate<ChargingStationId, ChargingStationAdminStatusType>> {
        self.tracker.admin_status_changed()
    }

    fn set_admin_status(&self, value: ChargingStationAdminStatusType, timestamp: Option<Timestamp>) {
        self.tracker.set_admin_status(value, timestamp, None, |update| {
            publish_admin_change(&self.events, self.entity_ref(), update);
        });
    }

    fn set_admin_status_history(&self, values: &[TimestampedStatus<ChargingStationAdminStatusType>], mode: SetMode) {
        self.tracker.set_admin_status_values(values, mode, None, |update| {
            publish_admin_change(&self.events, self.entity_ref(), update);
        });
    }
}

impl HasChildren<Evse> for ChargingStation {
    fn child_map(&self) -> &ChildMap<EvseId, Evse> {
        &self.evses
    }

    fn child_status_report(&self) -> StatusReport<EvseStatusType> {
        StatusReport::new(
            self.id().as_str(),
            self.evses.values().iter().map(|evse| evse.status().value),
        )
    }
}
