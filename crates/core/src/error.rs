//! Domain error model.

use thiserror::Error;

/// Result type used across the data model.
pub type DomainResult<T> = Result<T, DomainError>;

/// Data-model error.
///
/// Keep this focused on malformed input. Routing and delivery failures are
/// handled where they occur and never surface here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An integer tag did not name a known event type.
    #[error("unknown event type code: {0}")]
    UnknownEventType(u8),
}
