//! Handler fault reporting.
//!
//! A failing handler never stops a stream. The failure is packaged as a
//! [`HandlerFault`] and handed to the stream's [`FaultHook`]; the default hook
//! logs it.

use std::sync::Arc;

use shardline_core::{EventId, EventType};
use tracing::warn;

use crate::publisher::SubscriptionId;

/// A handler failed (returned an error or panicked) while processing an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFault {
    pub channel: String,
    pub subscription: SubscriptionId,
    pub event_id: EventId,
    pub event_type: EventType,
    pub message: String,
}

impl core::fmt::Display for HandlerFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "handler {} on stream '{}' failed for {} event {}: {}",
            self.subscription, self.channel, self.event_type, self.event_id, self.message
        )
    }
}

/// Observability hook receiving every [`HandlerFault`].
pub type FaultHook = Arc<dyn Fn(&HandlerFault) + Send + Sync>;

/// Default hook: structured `warn` log.
pub fn log_fault(fault: &HandlerFault) {
    warn!(
        stream = %fault.channel,
        subscription = %fault.subscription,
        event_id = %fault.event_id,
        event_type = %fault.event_type,
        error = %fault.message,
        "stream handler failed"
    );
}

pub(crate) fn default_hook() -> FaultHook {
    Arc::new(log_fault)
}
