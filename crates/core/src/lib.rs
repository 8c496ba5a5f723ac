//! `shardline-core` — event data model shared by the routing crates.
//!
//! This crate contains **pure data** primitives (no routing, no IO).

pub mod error;
pub mod event;
pub mod event_type;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use event::{AggregateRef, Event};
pub use event_type::EventType;
pub use id::{AggregateId, EventId};
