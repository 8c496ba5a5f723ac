//! Publish/subscribe abstraction over named channels (mechanics only).
//!
//! A [`Publisher`] carries ordered events to the handlers subscribed on a
//! channel name. It is the transport primitive under the broker and the
//! projections:
//!
//! ```text
//! producer → send_events("main") → Broker → publish(shard) → Projection handlers
//! ```
//!
//! ## Delivery contract
//!
//! - **No replay**: a handler sees only events published after it subscribed.
//! - **FIFO per subscriber**: for one channel, a handler is invoked for event N+1
//!   only after its invocation for event N has started (and, for synchronous
//!   handlers, finished).
//! - **Fault isolation**: a failing handler never prevents delivery to other
//!   handlers or of later events.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use shardline_core::Event;

use crate::handler::Handler;

/// Handle identifying one subscription on a publisher.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl core::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An ordered run of events addressed to one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub stream: String,
    pub events: Vec<Event>,
}

impl Batch {
    pub fn new(stream: impl Into<String>, events: impl IntoIterator<Item = Event>) -> Self {
        Self {
            stream: stream.into(),
            events: events.into_iter().collect(),
        }
    }
}

/// A queue-backed subscription to one channel.
///
/// Unlike callback subscriptions, events are buffered and pulled by the
/// consumer, so a slow consumer never stalls the publisher.
///
/// ## Usage Pattern
///
/// ```ignore
/// let subscription = stream.subscribe_queue("wallet");
///
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(event) => process(event)?,
///         Err(RecvTimeoutError::Timeout) => continue,  // Check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    channel: String,
    id: SubscriptionId,
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(channel: impl Into<String>, id: SubscriptionId, receiver: Receiver<M>) -> Self {
        Self {
            channel: channel.into(),
            id,
            receiver,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Named-channel pub/sub.
///
/// Channels need not exist before use: subscribing to a name nobody publishes
/// on is valid and simply waits.
///
/// ## Thread Safety
///
/// The trait requires `Send + Sync`; publishing and subscribing may happen from
/// any thread, including from inside a handler.
pub trait Publisher: Send + Sync {
    /// Publish an ordered batch to every handler currently subscribed on `channel`.
    ///
    /// The batch is enqueued as a unit: no other publish on the same channel
    /// interleaves with it.
    fn publish_batch(&self, channel: &str, events: Vec<Event>);

    /// Register `handler` for events published on `channel` from now on.
    fn subscribe(&self, channel: &str, handler: Handler) -> SubscriptionId;

    /// Remove a subscription. Returns `false` if it was not registered.
    fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool;

    fn publish(&self, channel: &str, event: Event) {
        self.publish_batch(channel, vec![event]);
    }

    /// Publish every batch, in input order.
    fn send_events(&self, batches: Vec<Batch>) {
        for batch in batches {
            self.publish_batch(&batch.stream, batch.events);
        }
    }

    /// Subscribe a buffered queue instead of a callback.
    fn subscribe_queue(&self, channel: &str) -> Subscription<Event> {
        let (tx, rx) = mpsc::channel();
        let id = self.subscribe(
            channel,
            Arc::new(move |event: &Event| {
                tx.send(event.clone())
                    .map_err(|_| anyhow::anyhow!("queue subscriber disconnected"))
            }),
        );
        Subscription::new(channel, id, rx)
    }
}

impl<P> Publisher for Arc<P>
where
    P: Publisher + ?Sized,
{
    fn publish_batch(&self, channel: &str, events: Vec<Event>) {
        (**self).publish_batch(channel, events)
    }

    fn subscribe(&self, channel: &str, handler: Handler) -> SubscriptionId {
        (**self).subscribe(channel, handler)
    }

    fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool {
        (**self).unsubscribe(channel, id)
    }
}
