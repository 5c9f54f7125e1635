//! EVSE: the leaf of the hierarchy

use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::debug;

use super::{
    attach_parent, publish_admin_change, to_json, ChargingStation, HasAdminStatusSchedule, HasStatusSchedule,
    Identifiable,
};
use crate::cascade::{EntityEvents, EntityRef, PropertyUpdate, StatusTracker, StatusUpdate, Subscribers};
use crate::config::HistorySize;
use crate::error::CoreError;
use crate::schedule::{ScheduleView, SetMode, TimestampedStatus};
use crate::status::{EvseAdminStatusType, EvseStatusType};
use crate::types::{Clock, EventTrackingId, EvseId, Timestamp};

/// Electric vehicle supply equipment
pub struct Evse {
    tracker: StatusTracker<EvseId, EvseStatusType, EvseAdminStatusType>,
    events: EntityEvents,
    station: RwLock<Weak<ChargingStation>>,
    description: RwLock<Option<String>>,
    max_power_kw: RwLock<Option<f64>>,
}

impl Evse {
    pub fn new(id: EvseId, history: HistorySize, clock: Arc<dyn Clock>) -> Result<Arc<Self>, CoreError> {
        if id.is_empty() {
            return Err(CoreError::EmptyId);
        }
        Ok(Arc::new(Self {
            tracker: StatusTracker::new(id, history.status, history.admin_status, clock),
            events: EntityEvents::new(),
            station: RwLock::new(Weak::new()),
            description: RwLock::new(None),
            max_power_kw: RwLock::new(None),
        }))
    }

    pub fn events(&self) -> &EntityEvents {
        &self.events
    }

    /// Containing station, if attached and still alive
    pub fn station(&self) -> Option<Arc<ChargingStation>> {
        self.station.read().upgrade()
    }

    pub(crate) fn attach_station(&self, station: Weak<ChargingStation>) -> Result<(), CoreError> {
        attach_parent(&self.station, self.id(), station)
    }

    pub(crate) fn detach_station(&self) {
        *self.station.write() = Weak::new();
    }

    pub fn description(&self) -> Option<String> {
        self.description.read().clone()
    }

    pub fn set_description(&self, description: Option<String>) {
        let old = std::mem::replace(&mut *self.description.write(), description.clone());
        if old != description {
            self.publish_property("description", to_json(&old), to_json(&description));
        }
    }

    pub fn max_power_kw(&self) -> Option<f64> {
        *self.max_power_kw.read()
    }

    pub fn set_max_power_kw(&self, max_power_kw: Option<f64>) {
        let old = std::mem::replace(&mut *self.max_power_kw.write(), max_power_kw);
        if old != max_power_kw {
            self.publish_property("max_power_kw", to_json(&old), to_json(&max_power_kw));
        }
    }

    fn publish_property(&self, property: &str, old: serde_json::Value, new: serde_json::Value) {
        debug!("{}: {} {} -> {}", self.id(), property, old, new);
        self.events.data_changed.notify(&PropertyUpdate {
            timestamp: self.tracker.clock().now(),
            event_id: EventTrackingId::new(),
            entity: self.entity_ref(),
            property: property.to_string(),
            old,
            new,
        });
    }
}

impl Identifiable for Evse {
    type Id = EvseId;

    fn id(&self) -> &EvseId {
        self.tracker.id()
    }

    fn entity_ref(&self) -> EntityRef {
        EntityRef::Evse(self.id().clone())
    }
}

impl HasStatusSchedule for Evse {
    type Status = EvseStatusType;

    fn status_schedule(&self) -> ScheduleView<'_, EvseStatusType> {
        self.tracker.status_schedule()
    }

    fn status_subscribers(&self) -> &Subscribers<StatusUpdate<EvseId, EvseStatusType>> {
        self.tracker.status_changed()
    }

    fn set_status(&self, value: EvseStatusType, timestamp: Option<Timestamp>) {
        self.tracker.set_status(value, timestamp, None, |update| {
            if let Some(station) = self.station() {
                station.evse_status_changed(update);
            }
        });
    }

    fn set_status_history(&self, values: &[TimestampedStatus<EvseStatusType>], mode: SetMode) {
        self.tracker.set_status_values(values, mode, None, |update| {
            if let Some(station) = self.station() {
                station.evse_status_changed(update);
            }
        });
    }
}

impl HasAdminStatusSchedule for Evse {
    type AdminStatus = EvseAdminStatusType;

    fn admin_status_schedule(&self) -> ScheduleView<'_, EvseAdminStatusType> {
        self.tracker.admin_status_schedule()
    }

    fn admin_status_subscribers(&self) -> &Subscribers<StatusUpdate<EvseId, EvseAdminStatusType>> {
        self.tracker.admin_status_changed()
    }

    fn set_admin_status(&self, value: EvseAdminStatusType, timestamp: Option<Timestamp>) {
        self.tracker.set_admin_status(value, timestamp, None, |update| {
            publish_admin_change(&self.events, self.entity_ref(), update);
        });
    }

    fn set_admin_status_history(&self, values: &[TimestampedStatus<EvseAdminStatusType>], mode: SetMode) {
        self.tracker.set_admin_status_values(values, mode, None, |update| {
            publish_admin_change(&self.events, self.entity_ref(), update);
        });
    }
}

impl std::fmt::Debug for Evse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evse")
            .field("id", self.id())
            .field("status", &self.status().value)
            .field("admin_status", &self.admin_status().value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{timestamp_from_millis, ManualClock};
    use parking_lot::Mutex;

    fn evse(id: &str) -> Arc<Evse> {
        Evse::new(EvseId::new(id), HistorySize::new(5, 5), Arc::new(ManualClock::new(0))).unwrap()
    }

    #[test]
    fn test_empty_id_rejected() {
        let result = Evse::new(EvseId::new(""), HistorySize::default(), Arc::new(ManualClock::new(0)));
        assert_eq!(result.err(), Some(CoreError::EmptyId));
    }

    #[test]
    fn test_status_subscribers() {
        let e = evse("E1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        e.on_status_changed(move |u| s.lock().push((u.id.clone(), u.old.value, u.new.value)));

        e.set_status(EvseStatusType::Available, Some(timestamp_from_millis(10)));
        e.set_status(EvseStatusType::Available, Some(timestamp_from_millis(20)));
        e.set_status(EvseStatusType::Occupied, Some(timestamp_from_millis(30)));

        assert_eq!(
            *seen.lock(),
            vec![
                (EvseId::new("E1"), EvseStatusType::Unknown, EvseStatusType::Available),
                (EvseId::new("E1"), EvseStatusType::Available, EvseStatusType::Occupied),
            ]
        );
        assert!(e.station().is_none());
    }

    #[test]
    fn test_admin_status_published_as_data_change() {
        let e = evse("E1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        e.events().data_changed.subscribe(move |u| s.lock().push((u.property.clone(), u.new.clone())));

        e.set_admin_status(EvseAdminStatusType::Operational, None);
        assert_eq!(e.admin_status().value, EvseAdminStatusType::Operational);
        assert_eq!(
            *seen.lock(),
            vec![("admin_status".to_string(), serde_json::json!("Operational"))]
        );
    }

    #[test]
    fn test_property_changes() {
        let e = evse("E1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        e.events().data_changed.subscribe(move |u| s.lock().push(u.property.clone()));

        e.set_max_power_kw(Some(22.0));
        e.set_max_power_kw(Some(22.0));
        e.set_description(Some("left".to_string()));

        assert_eq!(e.max_power_kw(), Some(22.0));
        assert_eq!(e.description().as_deref(), Some("left"));
        assert_eq!(*seen.lock(), vec!["max_power_kw", "description"]);
    }
}
