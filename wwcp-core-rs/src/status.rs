//! Status enumerations and status reports
//!
//! Every level of the hierarchy has its own operational and administrative
//! status type, because "available" means something different for an EVSE
//! than for a whole operator. Parents derive their operational status from a
//! [`StatusReport`] over their children.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// A status value that can live in a [`StatusSchedule`](crate::schedule::StatusSchedule)
pub trait StatusValue: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Sentinel every schedule is seeded with
    const UNKNOWN: Self;
}

// ============================================================================
// EVSE
// ============================================================================

/// Operational status of a single EVSE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvseStatusType {
    Unknown,
    Available,
    Reserved,
    Occupied,
    Faulted,
    OutOfService,
    Offline,
}

impl StatusValue for EvseStatusType {
    const UNKNOWN: Self = EvseStatusType::Unknown;
}

/// Administrative status of a single EVSE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvseAdminStatusType {
    Unknown,
    Operational,
    InternalUse,
    Blocked,
    OutOfService,
    Planned,
    Deleted,
}

impl StatusValue for EvseAdminStatusType {
    const UNKNOWN: Self = EvseAdminStatusType::Unknown;
}

// ============================================================================
// Charging station
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargingStationStatusType {
    Unknown,
    Available,
    PartiallyAvailable,
    Reserved,
    Occupied,
    Faulted,
    OutOfService,
    Offline,
}

impl StatusValue for ChargingStationStatusType {
    const UNKNOWN: Self = ChargingStationStatusType::Unknown;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargingStationAdminStatusType {
    Unknown,
    Operational,
    InternalUse,
    OutOfService,
    Planned,
    Deleted,
}

impl StatusValue for ChargingStationAdminStatusType {
    const UNKNOWN: Self = ChargingStationAdminStatusType::Unknown;
}

// ============================================================================
// Charging pool
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargingPoolStatusType {
    Unknown,
    Available,
    PartiallyAvailable,
    Occupied,
    Faulted,
    OutOfService,
    Offline,
}

impl StatusValue for ChargingPoolStatusType {
    const UNKNOWN: Self = ChargingPoolStatusType::Unknown;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargingPoolAdminStatusType {
    Unknown,
    Operational,
    InternalUse,
    OutOfService,
    Planned,
    Deleted,
}

impl StatusValue for ChargingPoolAdminStatusType {
    const UNKNOWN: Self = ChargingPoolAdminStatusType::Unknown;
}

// ============================================================================
// Charging station operator
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargingStationOperatorStatusType {
    Unknown,
    Available,
    Degraded,
    Unavailable,
    Offline,
}

impl StatusValue for ChargingStationOperatorStatusType {
    const UNKNOWN: Self = ChargingStationOperatorStatusType::Unknown;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargingStationOperatorAdminStatusType {
    Unknown,
    Operational,
    InternalUse,
    OutOfService,
    Deleted,
}

impl StatusValue for ChargingStationOperatorAdminStatusType {
    const UNKNOWN: Self = ChargingStationOperatorAdminStatusType::Unknown;
}

// ============================================================================
// Roaming network
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoamingNetworkStatusType {
    Unknown,
    Available,
    Degraded,
    Unavailable,
    Offline,
}

impl StatusValue for RoamingNetworkStatusType {
    const UNKNOWN: Self = RoamingNetworkStatusType::Unknown;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoamingNetworkAdminStatusType {
    Unknown,
    Operational,
    InternalUse,
    OutOfService,
    Deleted,
}

impl StatusValue for RoamingNetworkAdminStatusType {
    const UNKNOWN: Self = RoamingNetworkAdminStatusType::Unknown;
}

// ============================================================================
// EVSE groups
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvseGroupStatusType {
    Unknown,
    Available,
    PartiallyAvailable,
    Occupied,
    Faulted,
    OutOfService,
    Offline,
}

impl StatusValue for EvseGroupStatusType {
    const UNKNOWN: Self = EvseGroupStatusType::Unknown;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvseGroupAdminStatusType {
    Unknown,
    Operational,
    InternalUse,
    OutOfService,
    Deleted,
}

impl StatusValue for EvseGroupAdminStatusType {
    const UNKNOWN: Self = EvseGroupAdminStatusType::Unknown;
}

// ============================================================================
// Status report
// ============================================================================

/// Distribution of status values over a set of entities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport<S: StatusValue> {
    /// Entity the report was computed for
    pub entity_id: String,
    total: usize,
    counts: HashMap<S, usize>,
}

impl<S: StatusValue> StatusReport<S> {
    pub fn new(entity_id: impl Into<String>, statuses: impl IntoIterator<Item = S>) -> Self {
        let mut counts = HashMap::new();
        let mut total = 0;
        for status in statuses {
            *counts.entry(status).or_insert(0) += 1;
            total += 1;
        }
        Self {
            entity_id: entity_id.into(),
            total,
            counts,
        }
    }

    /// Number of entities in the report
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn count(&self, status: S) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Percentage (0-100) of entities in `status`
    pub fn share(&self, status: S) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.count(status) as f64 * 100.0 / self.total as f64
    }

    pub fn any(&self, status: S) -> bool {
        self.count(status) > 0
    }

    /// True for a non-empty report where every entity is in `status`
    pub fn all(&self, status: S) -> bool {
        self.total > 0 && self.count(status) == self.total
    }
}

// ============================================================================
// Default aggregations
// ============================================================================

/// Station status from its EVSEs
pub fn aggregate_evse_statuses(report: &StatusReport<EvseStatusType>) -> ChargingStationStatusType {
    use ChargingStationStatusType as S;
    use EvseStatusType as E;

    if report.is_empty() {
        return S::Unknown;
    }
    if report.all(E::Available) {
        return S::Available;
    }
    if report.any(E::Available) {
        return S::PartiallyAvailable;
    }
    if report.all(E::Offline) {
        return S::Offline;
    }
    if report.any(E::Occupied) {
        return S::Occupied;
    }
    if report.any(E::Reserved) {
        return S::Reserved;
    }
    if report.any(E::Faulted) {
        return S::Faulted;
    }
    if report.any(E::OutOfService) || report.any(E::Offline) {
        return S::OutOfService;
    }
    S::Unknown
}

/// Pool status from its stations
pub fn aggregate_station_statuses(report: &StatusReport<ChargingStationStatusType>) -> ChargingPoolStatusType {
    use ChargingPoolStatusType as P;
    use ChargingStationStatusType as S;

    if report.is_empty() {
        return P::Unknown;
    }
    if report.all(S::Available) {
        return P::Available;
    }
    if report.any(S::Available) || report.any(S::PartiallyAvailable) {
        return P::PartiallyAvailable;
    }
    if report.all(S::Offline) {
        return P::Offline;
    }
    if report.any(S::Occupied) || report.any(S::Reserved) {
        return P::Occupied;
    }
    if report.any(S::Faulted) {
        return P::Faulted;
    }
    if report.any(S::OutOfService) || report.any(S::Offline) {
        return P::OutOfService;
    }
    P::Unknown
}

/// Operator status from its pools
pub fn aggregate_pool_statuses(report: &StatusReport<ChargingPoolStatusType>) -> ChargingStationOperatorStatusType {
    use ChargingPoolStatusType as P;
    use ChargingStationOperatorStatusType as O;

    if report.is_empty() {
        return O::Unknown;
    }
    if report.all(P::Offline) {
        return O::Offline;
    }
    let serving = report.count(P::Available) + report.count(P::PartiallyAvailable) + report.count(P::Occupied);
    if serving == report.total() {
        return O::Available;
    }
    if serving > 0 {
        return O::Degraded;
    }
    O::Unavailable
}

/// Roaming network status from its operators
pub fn aggregate_operator_statuses(
    report: &StatusReport<ChargingStationOperatorStatusType>,
) -> RoamingNetworkStatusType {
    use ChargingStationOperatorStatusType as O;
    use RoamingNetworkStatusType as R;

    if report.is_empty() {
        return R::Unknown;
    }
    if report.all(O::Offline) {
        return R::Offline;
    }
    if report.all(O::Available) {
        return R::Available;
    }
    if report.any(O::Available) || report.any(O::Degraded) {
        return R::Degraded;
    }
    R::Unavailable
}

/// Default EVSE group status
pub fn aggregate_evse_group(report: &StatusReport<EvseStatusType>) -> EvseGroupStatusType {
    match aggregate_evse_statuses(report) {
        ChargingStationStatusType::Unknown => EvseGroupStatusType::Unknown,
        ChargingStationStatusType::Available => EvseGroupStatusType::Available,
        ChargingStationStatusType::PartiallyAvailable => EvseGroupStatusType::PartiallyAvailable,
        ChargingStationStatusType::Reserved | ChargingStationStatusType::Occupied => EvseGroupStatusType::Occupied,
        ChargingStationStatusType::Faulted => EvseGroupStatusType::Faulted,
        ChargingStationStatusType::OutOfService => EvseGroupStatusType::OutOfService,
        ChargingStationStatusType::Offline => EvseGroupStatusType::Offline,
    }
}
