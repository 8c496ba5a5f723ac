//! Background projection worker.
//!
//! Runs a projection's dispatch on its own thread, fed by a queue subscription
//! on the projection's shard. Publishers only enqueue, so a slow or blocking
//! handler holds up nothing but its own projection, while handlers are still
//! started strictly in shard order.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use shardline_core::Event;
use tracing::debug;

use crate::error::WorkerError;
use crate::fault::{FaultHook, HandlerFault, default_hook};
use crate::handler::{Dispatch, call_isolated};
use crate::projection::{Dispatcher, Projection};
use crate::publisher::{Publisher, Subscription, SubscriptionId};

/// Worker configuration.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Thread name and log label.
    pub name: String,
    /// How often an idle worker checks for shutdown.
    pub poll_interval: Duration,
    /// Receives every handler failure on the worker thread.
    pub fault_hook: FaultHook,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "projection-worker".to_string(),
            poll_interval: Duration::from_millis(250),
            fault_hook: default_hook(),
        }
    }
}

impl core::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("name", &self.name)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Replace the default logging fault hook.
    pub fn with_fault_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HandlerFault) + Send + Sync + 'static,
    {
        self.fault_hook = Arc::new(hook);
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub events_received: u64,
    pub events_handled: u64,
    pub events_ignored: u64,
    pub handler_faults: u64,
}

type Detach = Box<dyn FnOnce() -> bool + Send>;

/// Handle to control and join a background worker.
pub struct WorkerHandle {
    name: String,
    detach: Option<Detach>,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Unsubscribe, let the worker finish every event already delivered to its
    /// queue, and join it.
    pub fn shutdown(mut self) -> WorkerStats {
        self.stop();
        self.stats()
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn stop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl core::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Spawns projections onto dedicated threads.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Start `projection` on a worker thread.
    ///
    /// Registration follows [`Projection::start`]. Fails if the projection
    /// was already started, or if the thread cannot be spawned.
    pub fn spawn<P>(
        projection: Projection<P>,
        config: WorkerConfig,
    ) -> Result<WorkerHandle, WorkerError>
    where
        P: Publisher + ?Sized + 'static,
    {
        if !projection.claim_start()? {
            return Err(WorkerError::AlreadyStarted(projection.id().to_string()));
        }

        let shard = projection.id().to_string();
        let subscription = projection.stream().subscribe_queue(&shard);
        let subscription_id = subscription.id();

        let stream = Arc::clone(projection.stream());
        let detach_shard = shard.clone();
        let detach: Detach =
            Box::new(move || stream.unsubscribe(&detach_shard, subscription_id));

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));

        let worker = Worker {
            name: config.name.clone(),
            dispatcher: projection.dispatcher(),
            fault_hook: config.fault_hook,
            stats: stats.clone(),
        };
        let tick = config.poll_interval;
        let spawned = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || worker.run(&subscription, &shutdown_rx, tick));

        let join = match spawned {
            Ok(join) => join,
            Err(err) => {
                detach();
                return Err(WorkerError::Spawn(err));
            }
        };

        debug!(
            worker = %config.name,
            shard = %shard,
            subscription = %subscription_id,
            "projection worker started"
        );

        Ok(WorkerHandle {
            name: config.name,
            detach: Some(detach),
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

/// State owned by the worker thread.
struct Worker {
    name: String,
    dispatcher: Arc<Dispatcher>,
    fault_hook: FaultHook,
    stats: Arc<Mutex<WorkerStats>>,
}

impl Worker {
    fn run(&self, sub: &Subscription<Event>, shutdown_rx: &mpsc::Receiver<()>, tick: Duration) {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                // The subscription is detached by now. A publisher that picked it up
                // before the detach may still be sending; the queue disconnects once
                // the stream drops the last reference to it.
                while let Ok(event) = sub.recv() {
                    self.apply(sub.channel(), sub.id(), &event);
                }
                break;
            }

            match sub.recv_timeout(tick) {
                Ok(event) => self.apply(sub.channel(), sub.id(), &event),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!(worker = %self.name, shard = sub.channel(), "projection worker stopped");
    }

    fn apply(&self, shard: &str, subscription: SubscriptionId, event: &Event) {
        let outcome = call_isolated(|| self.dispatcher.handle(event));

        let fault = {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.events_received += 1;
            match outcome {
                Ok(Dispatch::Handled) => {
                    stats.events_handled += 1;
                    None
                }
                Ok(Dispatch::Ignored) => {
                    stats.events_ignored += 1;
                    None
                }
                Err(err) => {
                    stats.handler_faults += 1;
                    Some(HandlerFault {
                        channel: shard.to_owned(),
                        subscription,
                        event_id: event.id().clone(),
                        event_type: event.event_type(),
                        message: format!("{err:#}"),
                    })
                }
            }
        };

        if let Some(fault) = fault {
            let _ = call_isolated(|| {
                (self.fault_hook)(&fault);
                Ok(())
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EventHandler;
    use crate::stream::Stream;
    use crate::stream_config::StreamConfig;
    use serde_json::json;
    use shardline_core::{AggregateId, AggregateRef, EventType};
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

    fn event(event_type: EventType, version: u64) -> Event {
        Event::new(
            event_type,
            AggregateRef::new(AggregateId::new(), version),
            json!({ "amount": 100 }),
        )
    }

    #[test]
    fn worker_applies_shard_events_in_order() {
        let stream = Arc::new(Stream::new());
        let routes = Arc::new(StreamConfig::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let projection = Projection::new(
            "wallet",
            stream.clone(),
            routes.clone(),
            [EventHandler::new(EventType::WalletCredited, move |e| {
                sink.lock().unwrap().push(e.aggregate().version);
                Ok(())
            })],
        );

        let handle = ProjectionWorker::spawn(
            projection,
            WorkerConfig::default().with_poll_interval(Duration::from_millis(10)),
        )
        .unwrap();
        assert_eq!(routes.find_streams(EventType::WalletCredited), vec!["wallet"]);

        stream.publish_batch(
            "wallet",
            vec![
                event(EventType::WalletCredited, 1),
                event(EventType::AccountCreated, 2),
                event(EventType::WalletCredited, 3),
            ],
        );

        let stats = handle.shutdown();
        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
        assert_eq!(
            stats,
            WorkerStats {
                events_received: 3,
                events_handled: 2,
                events_ignored: 1,
                handler_faults: 0,
            }
        );
        assert_eq!(stream.subscriber_count("wallet"), 0);
    }

    #[test]
    fn worker_survives_failing_and_panicking_handlers() {
        let stream = Arc::new(Stream::new());
        let projection = Projection::new(
            "account",
            stream.clone(),
            Arc::new(StreamConfig::new()),
            [
                EventHandler::new(EventType::AccountCreated, |_| {
                    anyhow::bail!("duplicate account")
                }),
                EventHandler::new(EventType::AccountUpdated, |_| panic!("read model corrupted")),
                EventHandler::new(EventType::AccountDeleted, |_| Ok(())),
            ],
        );

        let faults = Arc::new(Mutex::new(Vec::new()));
        let sink = faults.clone();
        let config = WorkerConfig::default()
            .with_name("account-worker")
            .with_fault_hook(move |f| sink.lock().unwrap().push(f.clone()));
        let handle = ProjectionWorker::spawn(projection, config).unwrap();
        assert_eq!(handle.name(), "account-worker");

        stream.publish_batch(
            "account",
            vec![
                event(EventType::AccountCreated, 1),
                event(EventType::AccountUpdated, 2),
                event(EventType::AccountDeleted, 3),
            ],
        );

        let stats = handle.shutdown();
        assert_eq!(stats.events_received, 3);
        assert_eq!(stats.handler_faults, 2);
        assert_eq!(stats.events_handled, 1);

        let faults = faults.lock().unwrap();
        let types: Vec<_> = faults.iter().map(|f| f.event_type).collect();
        assert_eq!(types, vec![EventType::AccountCreated, EventType::AccountUpdated]);
        assert!(faults.iter().all(|f| f.channel == "account"));
        assert!(faults[0].message.contains("duplicate account"));
        assert!(faults[1].message.contains("read model corrupted"));
    }

    #[test]
    fn shutdown_during_publishing_loses_nothing_delivered() {
        for _ in 0..20 {
            let stream_faults = Arc::new(AtomicU64::new(0));
            let counter = stream_faults.clone();
            let stream = Arc::new(Stream::new().with_fault_hook(move |_| {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            }));

            let handled = Arc::new(AtomicU64::new(0));
            let tally = handled.clone();
            let projection = Projection::new(
                "wallet",
                stream.clone(),
                Arc::new(StreamConfig::new()),
                [EventHandler::new(EventType::WalletCredited, move |_| {
                    tally.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(())
                })],
            );
            let handle = ProjectionWorker::spawn(
                projection,
                WorkerConfig::default().with_poll_interval(Duration::from_millis(1)),
            )
            .unwrap();

            let producer = {
                let stream = stream.clone();
                thread::spawn(move || {
                    for version in 0..2000 {
                        stream.publish("wallet", event(EventType::WalletCredited, version));
                    }
                })
            };

            thread::sleep(Duration::from_micros(200));
            let stats = handle.shutdown();
            let after_shutdown = stream_faults.load(AtomicOrdering::SeqCst);
            producer.join().unwrap();

            assert_eq!(after_shutdown, 0);
            assert_eq!(stream_faults.load(AtomicOrdering::SeqCst), 0);
            assert_eq!(stats.handler_faults, 0);
            assert_eq!(stats.events_received, stats.events_handled);
            assert_eq!(handled.load(AtomicOrdering::SeqCst), stats.events_handled);
        }
    }

    #[test]
    fn started_projection_cannot_be_spawned() {
        let projection = Projection::new(
            "wallet",
            Arc::new(Stream::new()),
            Arc::new(StreamConfig::new()),
            [EventHandler::new(EventType::WalletCredited, |_| Ok(()))],
        );
        projection.start().unwrap();

        let err = ProjectionWorker::spawn(projection, WorkerConfig::default()).unwrap_err();
        assert!(matches!(err, WorkerError::AlreadyStarted(id) if id == "wallet"));
    }
}
