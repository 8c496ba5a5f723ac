//! Projections: per-type dispatch of a shard's events to read-model handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shardline_core::{Event, EventType};
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::handler::{Dispatch, EventHandler, Handler, HandlerResult};
use crate::publisher::Publisher;
use crate::stream_config::{StreamConfig, StreamRegistration};

/// Projection configuration.
#[derive(Debug, Clone)]
pub struct ProjectionConfig {
    /// Register `{ id, handled types }` in the routing table on start unless a
    /// registration for `id` already exists.
    pub auto_register: bool,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self { auto_register: true }
    }
}

impl ProjectionConfig {
    pub fn with_auto_register(mut self, enabled: bool) -> Self {
        self.auto_register = enabled;
        self
    }
}

/// Event-type → handler table shared between a projection and its subscription.
pub(crate) struct Dispatcher {
    id: String,
    handlers: HashMap<EventType, Handler>,
}

impl Dispatcher {
    pub(crate) fn handle(&self, event: &Event) -> anyhow::Result<Dispatch> {
        let Some(handler) = self.handlers.get(&event.event_type()) else {
            trace!(
                projection = %self.id,
                event_type = %event.event_type(),
                "no handler; event ignored"
            );
            return Ok(Dispatch::Ignored);
        };

        handler(event)?;
        Ok(Dispatch::Handled)
    }
}

/// A read-model builder bound to one shard stream.
///
/// A projection consumes the stream named after its id and invokes the handler
/// registered for each event's type. Events of other types are ignored, not
/// errors. Projections never know about each other: the routing table decides
/// which events reach which shard.
///
/// ## Lifecycle
///
/// 1. **Build**: `new` collects `{ type, handle }` pairs; a repeated type keeps
///    the last handler.
/// 2. **Start**: `start` (optionally) registers the shard and subscribes.
/// 3. **Handle**: every event published on the shard after `start` is dispatched
///    in publish order. Nothing published earlier is replayed.
pub struct Projection<P>
where
    P: Publisher + ?Sized + 'static,
{
    stream: Arc<P>,
    routes: Arc<StreamConfig>,
    dispatcher: Arc<Dispatcher>,
    settings: ProjectionConfig,
    started: AtomicBool,
}

impl<P> Projection<P>
where
    P: Publisher + ?Sized + 'static,
{
    pub fn new(
        id: impl Into<String>,
        stream: Arc<P>,
        routes: Arc<StreamConfig>,
        handlers: impl IntoIterator<Item = EventHandler>,
    ) -> Self {
        let mut table = HashMap::new();
        for handler in handlers {
            let (event_type, handle) = handler.into_parts();
            table.insert(event_type, handle);
        }

        Self {
            stream,
            routes,
            dispatcher: Arc::new(Dispatcher {
                id: id.into(),
                handlers: table,
            }),
            settings: ProjectionConfig::default(),
            started: AtomicBool::new(false),
        }
    }

    pub fn with_config(mut self, settings: ProjectionConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn id(&self) -> &str {
        &self.dispatcher.id
    }

    /// Types with a registered handler, in tag order.
    pub fn handled_types(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self.dispatcher.handlers.keys().copied().collect();
        types.sort();
        types
    }

    /// Dispatch one event to the handler for its type.
    pub fn handle(&self, event: &Event) -> anyhow::Result<Dispatch> {
        self.dispatcher.handle(event)
    }

    /// Subscribe to the shard named after this projection.
    ///
    /// Safe to call before or after the broker starts. Only the first call
    /// subscribes; later calls return `Ok(false)`.
    pub fn start(&self) -> Result<bool, ConfigError> {
        if !self.claim_start()? {
            return Ok(false);
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        self.stream.subscribe(
            self.id(),
            Arc::new(move |event: &Event| -> HandlerResult {
                dispatcher.handle(event).map(|_| ())
            }),
        );

        debug!(projection = %self.id(), types = ?self.handled_types(), "projection started");
        Ok(true)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Mark the projection started and register its shard. `Ok(false)` if it
    /// was already started.
    pub(crate) fn claim_start(&self) -> Result<bool, ConfigError> {
        if self.started.swap(true, Ordering::AcqRel) {
            debug!(projection = %self.id(), "projection already started");
            return Ok(false);
        }

        if self.settings.auto_register {
            let registration = StreamRegistration::new(self.id(), self.handled_types());
            if let Err(err) = self.routes.save_if_absent(registration) {
                self.started.store(false, Ordering::Release);
                return Err(err);
            }
        }
        Ok(true)
    }

    pub(crate) fn stream(&self) -> &Arc<P> {
        &self.stream
    }

    pub(crate) fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }
}

impl<P> core::fmt::Debug for Projection<P>
where
    P: Publisher + ?Sized + 'static,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Projection")
            .field("id", &self.id())
            .field("handled_types", &self.handled_types())
            .field("settings", &self.settings)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}
