use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, EventId, EventType};

/// Reserved id of the end-of-batch marker event.
pub const EOF_ID: &[u8] = b"EOF";

/// Identity and position of the aggregate an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateRef {
    pub id: AggregateId,

    /// Strictly increasing per aggregate id (producer contract, not checked here).
    pub version: u64,
}

impl AggregateRef {
    pub fn new(id: AggregateId, version: u64) -> Self {
        Self { id, version }
    }
}

/// An immutable fact about an aggregate.
///
/// Events are created by producers, already deserialized, and only ever read by
/// the routing layer. Every event carries exactly one [`EventType`], which is
/// the sole routing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,

    #[serde(rename = "type")]
    event_type: EventType,

    aggregate: AggregateRef,

    body: serde_json::Value,

    timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event with a fresh id, stamped with the current time.
    pub fn new(event_type: EventType, aggregate: AggregateRef, body: serde_json::Value) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            aggregate,
            body,
            timestamp: Utc::now(),
        }
    }

    /// End-of-batch marker.
    ///
    /// Delivered and routed exactly like any other event of `event_type`; it only
    /// lets consumers observe that everything before it has arrived.
    pub fn eof(event_type: EventType) -> Self {
        Self {
            id: EventId::from_bytes(EOF_ID),
            event_type,
            aggregate: AggregateRef::new(AggregateId::from_bytes(Vec::new()), 0),
            body: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = id;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn aggregate(&self) -> &AggregateRef {
        &self.aggregate
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_eof(&self) -> bool {
        self.id.as_bytes() == EOF_ID
    }
}
