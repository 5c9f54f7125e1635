//! Roaming network: the root of the hierarchy

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use super::{
    publish_admin_change, structural_change, ChargingStationOperator, ChildMap, Evse, HasAdminStatusSchedule,
    HasChildren, HasStatusSchedule, Identifiable,
};
use crate::cascade::{EntityEvents, EntityRef, StatusTracker, StatusUpdate, StructuralChangeKind, Subscribers};
use crate::config::HistorySize;
use crate::error::CoreError;
use crate::schedule::{ScheduleView, SetMode, TimestampedStatus};
use crate::status::{
    aggregate_operator_statuses, ChargingStationOperatorStatusType, RoamingNetworkAdminStatusType,
    RoamingNetworkStatusType, StatusReport,
};
use crate::types::{ChargingStationOperatorId, Clock, EventTrackingId, EvseId, RoamingNetworkId, Timestamp};

/// Derives a network status from its operators
pub type OperatorStatusAggregation =
    Arc<dyn Fn(&StatusReport<ChargingStationOperatorStatusType>) -> RoamingNetworkStatusType + Send + Sync>;

pub struct RoamingNetwork {
    tracker: StatusTracker<RoamingNetworkId, RoamingNetworkStatusType, RoamingNetworkAdminStatusType>,
    events: EntityEvents,
    operators: ChildMap<ChargingStationOperatorId, ChargingStationOperator>,
    aggregation: RwLock<OperatorStatusAggregation>,
}

impl RoamingNetwork {
    pub fn new(id: RoamingNetworkId, history: HistorySize, clock: Arc<dyn Clock>) -> Result<Arc<Self>, CoreError> {
        if id.is_empty() {
            return Err(CoreError::EmptyId);
        }
        let aggregation: OperatorStatusAggregation = Arc::new(aggregate_operator_statuses);
        Ok(Arc::new(Self {
            tracker: StatusTracker::new(id, history.status, history.admin_status, clock),
            events: EntityEvents::new(),
            operators: ChildMap::new(),
            aggregation: RwLock::new(aggregation),
        }))
    }

    /// Votes and notifications from the whole hierarchy end up here
    pub fn events(&self) -> &EntityEvents {
        &self.events
    }

    pub fn set_status_aggregation<F>(&self, aggregation: F)
    where
        F: Fn(&StatusReport<ChargingStationOperatorStatusType>) -> RoamingNetworkStatusType + Send + Sync + 'static,
    {
        *self.aggregation.write() = Arc::new(aggregation);
        self.recompute(self.tracker.clock().now(), EventTrackingId::new());
    }

    pub fn add_operator(
        self: &Arc<Self>,
        operator: Arc<ChargingStationOperator>,
    ) -> Result<Arc<ChargingStationOperator>, CoreError> {
        let now = self.tracker.clock().now();
        let change = structural_change(StructuralChangeKind::Added, self.entity_ref(), operator.entity_ref(), now);

        let operator = self.operators.add(&self.events, &change, operator.id().clone(), operator, |operator| {
            operator.attach_network(Arc::downgrade(self))?;
            Ok(operator.events().relay_to(Arc::downgrade(self), RoamingNetwork::events))
        })?;

        info!("{}: added operator {}", self.id(), operator.id());
        self.recompute(now, change.event_id);
        Ok(operator)
    }

    pub fn remove_operator(
        self: &Arc<Self>,
        id: &ChargingStationOperatorId,
    ) -> Result<Arc<ChargingStationOperator>, CoreError> {
        let now = self.tracker.clock().now();
        let change = structural_change(
            StructuralChangeKind::Removed,
            self.entity_ref(),
            EntityRef::ChargingStationOperator(id.clone()),
            now,
        );

        let operator = self.operators.remove(&self.events, &change, id, |operator, relay| {
            operator.events().detach(relay);
            operator.detach_network();
        })?;

        info!("{}: removed operator {}", self.id(), operator.id());
        self.recompute(now, change.event_id);
        Ok(operator)
    }

    pub fn operator(&self, id: &ChargingStationOperatorId) -> Option<Arc<ChargingStationOperator>> {
        self.operators.get(id)
    }

    pub fn operators(&self) -> Vec<Arc<ChargingStationOperator>> {
        self.operators.values()
    }

    pub fn contains_operator(&self, id: &ChargingStationOperatorId) -> bool {
        self.operators.contains(id)
    }

    pub fn evse(&self, id: &EvseId) -> Option<Arc<Evse>> {
        self.operators.values().iter().find_map(|operator| operator.evse(id))
    }

    pub fn evses(&self) -> Vec<Arc<Evse>> {
        self.operators.values().iter().flat_map(|operator| operator.evses()).collect()
    }

    pub(crate) fn operator_status_changed(
        &self,
        update: &StatusUpdate<ChargingStationOperatorId, ChargingStationOperatorStatusType>,
    ) {
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
            |_| {},
        );
    }
}

impl Identifiable for RoamingNetwork {
    type Id = RoamingNetworkId;

    fn id(&self) -> &RoamingNetworkId {
        self.tracker.id()
    }

    fn entity_ref(&self) -> EntityRef {
        EntityRef::RoamingNetwork(self.id().clone())
    }
}

impl HasStatusSchedule for RoamingNetwork {
    type Status = RoamingNetworkStatusType;

    fn status_schedule(&self) -> ScheduleView<'_, RoamingNetworkStatusType> {
        self.tracker.status_schedule()
    }

    fn status_subscribers(&self) -> &Subscribers<StatusUpdate<RoamingNetworkId, RoamingNetworkStatusType>> {
        self.tracker.status_changed()
    }

    fn set_status(&self, value: RoamingNetworkStatusType, timestamp: Option<Timestamp>) {
        self.tracker.set_status(value, timestamp, None, |_| {});
    }

    fn set_status_history(&self, values: &[TimestampedStatus<RoamingNetworkStatusType>], mode: SetMode) {
        self.tracker.set_status_values(values, mode, None, |_| {});
    }
}

impl HasAdminStatusSchedule for RoamingNetwork {
    type AdminStatus = RoamingNetworkAdminStatusType;

    fn admin_status_schedule(&self) -> ScheduleView<'_, RoamingNetworkAdminStatusType> {
        self.tracker.admin_status_schedule()
    }

    fn admin_status_subscribers(&self) -> &Subscribers<StatusUpdate<RoamingNetworkId, RoamingNetworkAdminStatusType>> {
        self.tracker.admin_status_changed()
    }

    fn set_admin_status(&self, value: RoamingNetworkAdminStatusType, timestamp: Option<Timestamp>) {
        self.tracker.set_admin_status(value, timestamp, None, |update| {
            publish_admin_change(&self.events, self.entity_ref(), update);
        });
    }

    fn set_admin_status_history(&self, values: &[TimestampedStatus<RoamingNetworkAdminStatusType>], mode: SetMode) {
        self.tracker.set_admin_status_values(values, mode, None, |update| {
            publish_admin_change(&self.events, self.entity_ref(), update);
        });
    }
}

impl HasChildren<ChargingStationOperator> for RoamingNetwork {
    fn child_map(&self) -> &ChildMap<ChargingStationOperatorId, ChargingStationOperator> {
        &self.operators
    }

    fn child_status_report(&self) -> StatusReport<ChargingStationOperatorStatusType> {
        StatusReport::new(
            self.id().as_str(),
            self.operators.values().iter().map(|operator| operator.status().value),
        )
    }
}
