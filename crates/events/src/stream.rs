//! In-process [`Publisher`] over named channels.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shardline_core::Event;
use tracing::{debug, trace};

use crate::fault::{FaultHook, HandlerFault, default_hook};
use crate::handler::{Handler, call_isolated};
use crate::publisher::{Publisher, SubscriptionId};

struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
    active: AtomicBool,
}

type Snapshot = Arc<Vec<Arc<Subscriber>>>;

struct Pending {
    event: Event,
    /// Subscribers registered when the event was published.
    subscribers: Snapshot,
}

#[derive(Default)]
struct Channel {
    subscribers: Snapshot,
    queue: VecDeque<Pending>,
    /// Set while some thread is running this channel's delivery loop.
    draining: bool,
}

/// In-memory named-channel broadcast.
///
/// - No IO / no async
/// - Each channel has one FIFO queue; whichever publisher finds it idle drains
///   it, invoking handlers outside the lock
/// - Publishing from inside a handler only enqueues, so re-entrant publishes
///   keep FIFO order and cannot deadlock
/// - Channels drain independently; a slow handler only holds up its own channel
pub struct Stream {
    channels: Mutex<HashMap<String, Channel>>,
    next_id: AtomicU64,
    fault_hook: FaultHook,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default logging fault hook.
    pub fn with_fault_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HandlerFault) + Send + Sync + 'static,
    {
        self.fault_hook = Arc::new(hook);
        self
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock()
            .get(channel)
            .map_or(0, |ch| ch.subscribers.len())
    }

    /// Names of every channel that has been subscribed to, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        // Handlers never run under this lock, so a poisoned map is still consistent.
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain(&self, channel: &str) {
        loop {
            let pending = {
                let mut channels = self.lock();
                let Some(ch) = channels.get_mut(channel) else {
                    return;
                };
                match ch.queue.pop_front() {
                    Some(pending) => pending,
                    None => {
                        ch.draining = false;
                        return;
                    }
                }
            };

            self.deliver(channel, &pending);
        }
    }

    fn deliver(&self, channel: &str, pending: &Pending) {
        for subscriber in pending.subscribers.iter() {
            if !subscriber.active.load(Ordering::Acquire) {
                continue;
            }

            if let Err(err) = call_isolated(|| (subscriber.handler)(&pending.event)) {
                let fault = HandlerFault {
                    channel: channel.to_owned(),
                    subscription: subscriber.id,
                    event_id: pending.event.id().clone(),
                    event_type: pending.event.event_type(),
                    message: format!("{err:#}"),
                };
                let _ = call_isolated(|| {
                    (self.fault_hook)(&fault);
                    Ok(())
                });
            }
        }
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            fault_hook: default_hook(),
        }
    }
}

impl core::fmt::Debug for Stream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stream")
            .field("channels", &self.channels())
            .finish_non_exhaustive()
    }
}

impl Publisher for Stream {
    fn publish_batch(&self, channel: &str, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }

        {
            let mut channels = self.lock();
            let Some(ch) = channels
                .get_mut(channel)
                .filter(|ch| !ch.subscribers.is_empty())
            else {
                trace!(
                    stream = channel,
                    count = events.len(),
                    "no subscribers; events dropped"
                );
                return;
            };

            trace!(stream = channel, count = events.len(), "enqueue batch");
            let subscribers = Arc::clone(&ch.subscribers);
            ch.queue.extend(events.into_iter().map(|event| Pending {
                event,
                subscribers: Arc::clone(&subscribers),
            }));

            if ch.draining {
                return;
            }
            ch.draining = true;
        }

        self.drain(channel);
    }

    fn subscribe(&self, channel: &str, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);

        let mut channels = self.lock();
        let ch = channels.entry(channel.to_owned()).or_default();
        let mut subscribers = Vec::clone(&ch.subscribers);
        subscribers.push(Arc::new(Subscriber {
            id,
            handler,
            active: AtomicBool::new(true),
        }));
        ch.subscribers = Arc::new(subscribers);

        debug!(stream = channel, subscription = %id, "subscribed");
        id
    }

    fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool {
        let mut channels = self.lock();
        let Some(ch) = channels.get_mut(channel) else {
            return false;
        };

        let Some(found) = ch.subscribers.iter().find(|s| s.id == id) else {
            return false;
        };
        // Already-queued snapshots still hold the subscriber; this stops them too.
        found.active.store(false, Ordering::Release);

        let remaining: Vec<_> = ch
            .subscribers
            .iter()
            .filter(|s| s.id != id)
            .cloned()
            .collect();
        ch.subscribers = Arc::new(remaining);

        debug!(stream = channel, subscription = %id, "unsubscribed");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerResult;
    use crate::publisher::Batch;
    use proptest::prelude::*;
    use serde_json::json;
    use shardline_core::{AggregateId, AggregateRef, EventType};

    fn event(event_type: EventType, version: u64) -> Event {
        Event::new(
            event_type,
            AggregateRef::new(AggregateId::new(), version),
            json!({ "amount": 100 }),
        )
    }

    fn recorder() -> (Arc<Mutex<Vec<u64>>>, Handler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Handler = Arc::new(move |e: &Event| -> HandlerResult {
            sink.lock().unwrap().push(e.aggregate().version);
            Ok(())
        });
        (seen, handler)
    }

    #[test]
    fn delivers_batch_in_order() {
        let stream = Stream::new();
        let (seen, handler) = recorder();
        stream.subscribe("main", handler);

        stream.send_events(vec![Batch::new(
            "main",
            [
                event(EventType::WalletCredited, 0),
                event(EventType::WalletDebited, 1),
                Event::eof(EventType::WalletDebited),
            ],
        )]);

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 0]);
    }

    #[test]
    fn batches_are_delivered_in_call_order() {
        let stream = Stream::new();
        let (seen, handler) = recorder();
        stream.subscribe("main", handler);

        stream.send_events(vec![
            Batch::new(
                "main",
                [
                    event(EventType::WalletCredited, 1),
                    event(EventType::WalletCredited, 2),
                ],
            ),
            Batch::new("other", [event(EventType::WalletCredited, 99)]),
            Batch::new("main", [event(EventType::WalletCredited, 3)]),
        ]);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn late_subscriber_sees_no_history() {
        let stream = Stream::new();
        let (early, early_handler) = recorder();
        stream.subscribe("main", early_handler);
        stream.publish("main", event(EventType::AccountCreated, 1));

        let (late, late_handler) = recorder();
        stream.subscribe("main", late_handler);
        stream.publish("main", event(EventType::AccountUpdated, 2));

        assert_eq!(*early.lock().unwrap(), vec![1, 2]);
        assert_eq!(*late.lock().unwrap(), vec![2]);
    }

    #[test]
    fn subscribing_to_unknown_channel_is_valid() {
        let stream = Stream::new();
        let (seen, handler) = recorder();
        stream.subscribe("nobody-publishes-here", handler);

        stream.publish("main", event(EventType::WalletCredited, 1));

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(stream.subscriber_count("nobody-publishes-here"), 1);
    }

    #[test]
    fn failing_handler_is_isolated_and_reported() {
        let faults = Arc::new(Mutex::new(Vec::new()));
        let sink = faults.clone();
        let stream = Stream::new().with_fault_hook(move |f| sink.lock().unwrap().push(f.clone()));

        let failing = stream.subscribe(
            "main",
            Arc::new(|e: &Event| -> HandlerResult {
                if e.aggregate().version == 1 {
                    anyhow::bail!("cannot apply version 1");
                }
                Ok(())
            }),
        );
        let (seen, handler) = recorder();
        stream.subscribe("main", handler);

        stream.publish_batch(
            "main",
            vec![event(EventType::WalletCredited, 1), event(EventType::WalletDebited, 2)],
        );

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

        let faults = faults.lock().unwrap();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].subscription, failing);
        assert_eq!(faults[0].channel, "main");
        assert_eq!(faults[0].event_type, EventType::WalletCredited);
        assert!(faults[0].message.contains("cannot apply version 1"));
    }

    #[test]
    fn panicking_handler_does_not_stop_the_channel() {
        let fault_count = Arc::new(AtomicU64::new(0));
        let counter = fault_count.clone();
        let stream = Stream::new().with_fault_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        stream.subscribe(
            "main",
            Arc::new(|e: &Event| -> HandlerResult {
                if e.aggregate().version == 1 {
                    panic!("corrupt read model");
                }
                Ok(())
            }),
        );
        let (seen, handler) = recorder();
        stream.subscribe("main", handler);

        stream.publish("main", event(EventType::WalletCredited, 1));
        stream.publish("main", event(EventType::WalletCredited, 2));

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(fault_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentrant_publish_keeps_fifo_order() {
        let stream = Arc::new(Stream::new());
        let (seen, handler) = recorder();

        let inner = Arc::downgrade(&stream);
        stream.subscribe(
            "main",
            Arc::new(move |e: &Event| -> HandlerResult {
                if e.aggregate().version == 1 {
                    if let Some(stream) = inner.upgrade() {
                        stream.publish("main", event(EventType::WalletDebited, 3));
                    }
                }
                Ok(())
            }),
        );
        stream.subscribe("main", handler);

        stream.publish_batch(
            "main",
            vec![event(EventType::WalletCredited, 1), event(EventType::WalletCredited, 2)],
        );

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let stream = Stream::new();
        let (seen, handler) = recorder();
        let id = stream.subscribe("main", handler);

        stream.publish("main", event(EventType::WalletCredited, 1));
        assert!(stream.unsubscribe("main", id));
        assert!(!stream.unsubscribe("main", id));
        stream.publish("main", event(EventType::WalletCredited, 2));

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(stream.subscriber_count("main"), 0);
    }

    #[test]
    fn queue_subscription_buffers_events() {
        let stream = Stream::new();
        let sub = stream.subscribe_queue("wallet");

        stream.publish("wallet", event(EventType::WalletCredited, 1));
        stream.publish("wallet", event(EventType::WalletDebited, 2));

        assert_eq!(sub.channel(), "wallet");
        assert_eq!(sub.try_recv().unwrap().aggregate().version, 1);
        assert_eq!(sub.try_recv().unwrap().aggregate().version, 2);
        assert!(sub.try_recv().is_err());
    }

    proptest! {
        /// Property: a single subscriber observes every published event in
        /// publish order, however the events are split into batches.
        #[test]
        fn single_subscriber_sees_publish_order(
            batch_sizes in prop::collection::vec(0usize..6, 0..8)
        ) {
            let stream = Stream::new();
            let (seen, handler) = recorder();
            stream.subscribe("main", handler);

            let mut version = 0u64;
            let batches: Vec<Batch> = batch_sizes
                .iter()
                .map(|&n| {
                    let events: Vec<Event> = (0..n)
                        .map(|_| {
                            version += 1;
                            event(EventType::AccountUpdated, version)
                        })
                        .collect();
                    Batch::new("main", events)
                })
                .collect();

            stream.send_events(batches);

            let expected: Vec<u64> = (1..=version).collect();
            prop_assert_eq!(seen.lock().unwrap().clone(), expected);
        }
    }
}
