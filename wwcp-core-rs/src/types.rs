//! Core types shared by every layer of the hierarchy

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Point in time used for every status entry and notification
pub type Timestamp = DateTime<Utc>;

/// Source of "now" for schedules and cascades
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Shared handle to the default wall clock
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Manually driven clock with millisecond resolution
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `millis` since the Unix epoch
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        timestamp_from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Build a timestamp from milliseconds since the Unix epoch
pub fn timestamp_from_millis(millis: i64) -> Timestamp {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Correlates every notification caused by one triggering mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTrackingId(Uuid);

impl EventTrackingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventTrackingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventTrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounds every identifier used as a map key in the hierarchy
pub trait EntityId: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> EntityId for T where T: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

string_id!(
    /// EVSE identifier, e.g. `DE*GEF*E1234*1`
    EvseId
);
string_id!(
    /// Charging station identifier
    ChargingStationId
);
string_id!(
    /// Charging pool identifier
    ChargingPoolId
);
string_id!(
    /// Charging station operator identifier, e.g. `DE*GEF`
    ChargingStationOperatorId
);
string_id!(
    /// Roaming network identifier
    RoamingNetworkId
);
string_id!(
    /// Entity group identifier
    EntityGroupId
);
string_id!(
    /// Identity a push/pull fan-out acts under
    AuthId
);
string_id!(
    /// Identifier of a downstream roaming receiver
    ReceiverId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now().timestamp_millis(), 1_000);

        clock.advance(500);
        assert_eq!(clock.now().timestamp_millis(), 1_500);

        clock.set(42);
        assert_eq!(clock.now().timestamp_millis(), 42);
    }

    #[test]
    fn test_id_serialization() {
        let id = EvseId::new("DE*GEF*E1*1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"DE*GEF*E1*1\"");
        assert_eq!(id.to_string(), "DE*GEF*E1*1");
        assert!(EvseId::new("  ").is_empty());
    }

    #[test]
    fn test_event_tracking_ids_unique() {
        assert_ne!(EventTrackingId::new(), EventTrackingId::new());
    }
}
