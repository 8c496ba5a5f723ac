use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use shardline_core::{Event, EventType};

/// Outcome of a single handler invocation. The `Ok` value carries nothing the
/// routing layer depends on.
pub type HandlerResult = anyhow::Result<()>;

/// A subscriber callback, shared between the stream and its snapshots.
pub type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// A `{ type, handle }` pair used to build a projection's dispatch table.
#[derive(Clone)]
pub struct EventHandler {
    event_type: EventType,
    handle: Handler,
}

impl EventHandler {
    pub fn new<F>(event_type: EventType, handle: F) -> Self
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            event_type,
            handle: Arc::new(handle),
        }
    }

    /// Build from an already shared handler, e.g. one callback reused for several types.
    pub fn from_shared(event_type: EventType, handle: Handler) -> Self {
        Self { event_type, handle }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub(crate) fn into_parts(self) -> (EventType, Handler) {
        (self.event_type, self.handle)
    }
}

impl core::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventHandler")
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

/// What a projection did with an event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// No handler registered for the event's type.
    Ignored,
}

/// Run `f`, turning a panic into an ordinary error so one faulty handler
/// cannot unwind through the delivery loop.
pub(crate) fn call_isolated<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "handler panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
