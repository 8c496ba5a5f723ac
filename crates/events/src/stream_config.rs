//! Routing table: which named shard streams carry which event types.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use shardline_core::EventType;
use tracing::debug;

use crate::error::ConfigError;

/// Sharding rule: events of these types belong to the stream named `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRegistration {
    pub id: String,
    pub events: Vec<EventType>,
}

impl StreamRegistration {
    /// Duplicate types are dropped, keeping first-occurrence order.
    pub fn new(id: impl Into<String>, events: impl IntoIterator<Item = EventType>) -> Self {
        let mut unique: Vec<EventType> = Vec::new();
        for t in events {
            if !unique.contains(&t) {
                unique.push(t);
            }
        }
        Self {
            id: id.into(),
            events: unique,
        }
    }

    pub fn carries(&self, event_type: EventType) -> bool {
        self.events.contains(&event_type)
    }
}

/// Shared, synchronized routing table.
///
/// Registrations keep the order in which their id was first saved; saving an
/// existing id replaces its event set in place. Every write is atomic with
/// respect to every read, so `find_streams` never sees a half-applied save.
#[derive(Debug, Default)]
pub struct StreamConfig {
    streams: RwLock<Vec<StreamRegistration>>,
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_registrations(
        registrations: impl IntoIterator<Item = StreamRegistration>,
    ) -> Result<Self, ConfigError> {
        let config = Self::new();
        for registration in registrations {
            config.save(registration)?;
        }
        Ok(config)
    }

    /// Load from a JSON array of `{ "id": "...", "events": [<type codes>] }`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let registrations: Vec<StreamRegistration> = serde_json::from_str(json)?;
        Self::from_registrations(
            registrations
                .into_iter()
                .map(|r| StreamRegistration::new(r.id, r.events)),
        )
    }

    /// Upsert by id.
    pub fn save(&self, registration: StreamRegistration) -> Result<(), ConfigError> {
        let registration = validate(registration)?;
        let mut streams = self.write();

        match streams.iter_mut().find(|r| r.id == registration.id) {
            Some(existing) => {
                debug!(
                    stream = %registration.id,
                    events = ?registration.events,
                    "stream registration replaced"
                );
                existing.events = registration.events;
            }
            None => {
                debug!(
                    stream = %registration.id,
                    events = ?registration.events,
                    "stream registered"
                );
                streams.push(registration);
            }
        }
        Ok(())
    }

    /// Insert only if no registration with this id exists. Returns whether it inserted.
    pub fn save_if_absent(&self, registration: StreamRegistration) -> Result<bool, ConfigError> {
        let registration = validate(registration)?;
        let mut streams = self.write();

        if streams.iter().any(|r| r.id == registration.id) {
            return Ok(false);
        }
        debug!(stream = %registration.id, events = ?registration.events, "stream registered");
        streams.push(registration);
        Ok(true)
    }

    /// Append-style entry point; same upsert semantics as [`StreamConfig::save`].
    pub fn push(&self, registration: StreamRegistration) -> Result<(), ConfigError> {
        self.save(registration)
    }

    /// Ordered snapshot of every registration.
    pub fn streams(&self) -> Vec<StreamRegistration> {
        self.read().clone()
    }

    pub fn list(&self) -> Vec<StreamRegistration> {
        self.streams()
    }

    pub fn get(&self, id: &str) -> Option<StreamRegistration> {
        self.read().iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Ids of the streams carrying `event_type`, in registration order.
    pub fn find_streams(&self, event_type: EventType) -> Vec<String> {
        self.read()
            .iter()
            .filter(|r| r.carries(event_type))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Like [`StreamConfig::find_streams`], returning whole registrations.
    pub fn find_registrations(&self, event_type: EventType) -> Vec<StreamRegistration> {
        self.read()
            .iter()
            .filter(|r| r.carries(event_type))
            .cloned()
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<StreamRegistration>> {
        // Writers never leave the vector half-updated, so poison carries no meaning here.
        self.streams.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<StreamRegistration>> {
        self.streams.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate(registration: StreamRegistration) -> Result<StreamRegistration, ConfigError> {
    if registration.id.trim().is_empty() {
        return Err(ConfigError::EmptyStreamId);
    }
    Ok(StreamRegistration::new(registration.id, registration.events))
}
