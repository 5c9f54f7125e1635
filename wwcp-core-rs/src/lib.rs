//! # WWCP Core
//!
//! Status tracking and outbound synchronization core for e-mobility roaming
//! networks.
//!
//! ## Architecture
//!
//! ```text
//!  EVSE.set_status
//!       │ StatusSchedule.insert (bounded, chronological)
//!       ▼
//!  ChangeCascade ──► subscribers ──► EntityGroup recompute
//!       │
//!       ▼ upward, synchronous
//!  Station ─► Pool ─► Operator ─► RoamingNetwork   (aggregated status)
//!
//!  StatusUpdateQueue ──► FanOut ──► receiver 1..n (parallel, per-receiver deadline)
//!                                       │
//!                                       ▼
//!                               reconcile::flatten ──► one PushResult
//! ```
//!
//! ## Outcomes
//!
//! | Outcome | Meaning |
//! |---------|---------|
//! | Success | receiver accepted everything |
//! | Partial | receivers disagreed (reconciled results only) |
//! | NoOperation | nothing to send after filtering |
//! | Enqueued | handed to the receiver's queue |
//! | AdminDown | integration disabled, not attempted |
//! | OutOfService | receiver temporarily unable to serve |
//! | Timeout / LockTimeout | deadline or local lock missed |
//! | Error | unexpected failure |

pub mod cascade;
pub mod config;
pub mod entity;
pub mod error;
pub mod fanout;
pub mod group;
pub mod outbound;
pub mod push;
pub mod reconcile;
pub mod schedule;
pub mod status;
pub mod types;

pub use cascade::{
    EntityEvents, EntityRef, EvseStatusUpdate, PropertyUpdate, StatusUpdate, StructuralChange, StructuralChangeKind,
    Subscribers, SubscriptionId, Vote, VoteBroadcast,
};
pub use config::{ConfigError, HistorySize, SyncConfig};
pub use entity::{
    ChargingPool, ChargingStation, ChargingStationOperator, Evse, HasAdminStatusSchedule, HasChildren,
    HasStatusSchedule, Identifiable, RoamingNetwork,
};
pub use error::{CoreError, ReceiverError};
pub use fanout::{FanOut, PullFanOut, PullReceiver, PushReceiver};
pub use group::{EntityGroup, EvseGroup};
pub use outbound::StatusUpdateQueue;
pub use push::{Outcome, PullResult, PushResult, TransmissionType};
pub use schedule::{ScheduleView, SetMode, StatusSchedule, TimestampedStatus};
pub use status::*;
pub use types::*;
