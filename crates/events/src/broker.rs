//! Fan-out from the main stream to shard streams.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shardline_core::Event;
use tracing::{debug, trace, warn};

use crate::handler::HandlerResult;
use crate::publisher::Publisher;
use crate::stream_config::StreamConfig;

/// Name of the unsharded stream producers publish to.
pub const MAIN_STREAM: &str = "main";

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Stream the broker reads from.
    pub main_stream: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            main_stream: MAIN_STREAM.to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn with_main_stream(mut self, name: impl Into<String>) -> Self {
        self.main_stream = name.into();
        self
    }
}

/// Republishes every main-stream event onto the shard streams configured for
/// its type.
///
/// The broker is a single subscriber on the main stream, so events routed to
/// the same shard arrive there in main-stream order. Delivery is
/// fire-and-forget: there is no acknowledgement or backpressure.
pub struct Broker<P>
where
    P: Publisher + ?Sized + 'static,
{
    routes: Arc<StreamConfig>,
    stream: Arc<P>,
    settings: BrokerConfig,
    started: AtomicBool,
}

impl<P> Broker<P>
where
    P: Publisher + ?Sized + 'static,
{
    pub fn new(routes: Arc<StreamConfig>, stream: Arc<P>) -> Self {
        Self::with_config(routes, stream, BrokerConfig::default())
    }

    pub fn with_config(routes: Arc<StreamConfig>, stream: Arc<P>, settings: BrokerConfig) -> Self {
        Self {
            routes,
            stream,
            settings,
            started: AtomicBool::new(false),
        }
    }

    /// Subscribe to the main stream. Only the first call has an effect; it
    /// returns `false` on every later call.
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            debug!(stream = %self.settings.main_stream, "broker already started");
            return false;
        }

        let routes = Arc::clone(&self.routes);
        // Weak: the stream owns this closure, the closure must not own the stream.
        let stream = Arc::downgrade(&self.stream);
        let main = self.settings.main_stream.clone();

        self.stream.subscribe(
            &self.settings.main_stream,
            Arc::new(move |event: &Event| -> HandlerResult {
                if let Some(stream) = stream.upgrade() {
                    fan_out(&routes, &*stream, &main, event);
                }
                Ok(())
            }),
        );

        debug!(stream = %self.settings.main_stream, "broker started");
        true
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn main_stream(&self) -> &str {
        &self.settings.main_stream
    }
}

impl<P> core::fmt::Debug for Broker<P>
where
    P: Publisher + ?Sized + 'static,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Broker")
            .field("settings", &self.settings)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

/// Publish `event` on every shard carrying its type. Returns how many shards
/// received it.
pub fn fan_out<P>(routes: &StreamConfig, stream: &P, main: &str, event: &Event) -> usize
where
    P: Publisher + ?Sized,
{
    let targets = routes.find_streams(event.event_type());
    if targets.is_empty() {
        trace!(
            event_type = %event.event_type(),
            event_id = %event.id(),
            "no shard carries event type"
        );
        return 0;
    }

    let mut delivered = 0;
    for shard in targets {
        if shard == main {
            warn!(
                stream = %shard,
                event_type = %event.event_type(),
                "shard aliases main stream; skipped"
            );
            continue;
        }
        trace!(
            stream = %shard,
            event_type = %event.event_type(),
            event_id = %event.id(),
            "route event"
        );
        stream.publish(&shard, event.clone());
        delivered += 1;
    }
    delivered
}
