//! WWCP property-based tests
//!
//! Standalone proptest suite for the invariants of the status schedule and
//! the result reconciler.
//!
//! # Usage
//!
//! ```bash
//! cargo test -p wwcp-property-tests               # all property tests
//! cargo test -p wwcp-property-tests schedule      # schedule invariants only
//! PROPTEST_CASES=1000 cargo test -p wwcp-property-tests
//! ```
//!
//! # Test Modules
//!
//! - `prop_schedule`: chronological head, bounded history, change-only notification
//! - `prop_reconcile`: flatten verdicts and concatenation order

// Re-export for convenience in tests
pub use wwcp_core::*;
