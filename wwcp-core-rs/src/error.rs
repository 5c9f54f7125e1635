//! Error types
//!
//! Expected operational outcomes (admin down, timeouts, ...) are never
//! errors; they are `Outcome` values on push/pull results.

use thiserror::Error;

/// Structural and programming errors raised by the hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("identifier must not be empty")]
    EmptyId,

    #[error("child {id} already exists")]
    DuplicateChild { id: String },

    #[error("{id} already belongs to {parent}")]
    AlreadyAttached { id: String, parent: String },

    #[error("child {id} does not exist")]
    UnknownChild { id: String },

    #[error("structural change vetoed: {reason}")]
    Vetoed { reason: String },
}

/// Failure reported by a receiver adapter instead of a result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiverError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("receiver queue closed")]
    QueueClosed,

    #[error("internal receiver error: {0}")]
    Internal(String),
}
