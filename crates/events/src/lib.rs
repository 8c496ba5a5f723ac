//! `shardline-events` — event routing and fan-out.
//!
//! A single ordered "main" stream is routed to independent projections, each
//! interested in a subset of event types:
//!
//! ```text
//! producer → Stream("main") → Broker → StreamConfig lookup
//!          → Stream(shard) → Projection handlers
//! ```

pub mod broker;
pub mod error;
pub mod fault;
pub mod handler;
pub mod projection;
pub mod publisher;
pub mod stream;
pub mod stream_config;
pub mod worker;

pub use broker::{Broker, BrokerConfig, MAIN_STREAM, fan_out};
pub use error::{ConfigError, WorkerError};
pub use fault::{FaultHook, HandlerFault, log_fault};
pub use handler::{Dispatch, EventHandler, Handler, HandlerResult};
pub use projection::{Projection, ProjectionConfig};
pub use publisher::{Batch, Publisher, Subscription, SubscriptionId};
pub use stream::Stream;
pub use stream_config::{StreamConfig, StreamRegistration};
pub use worker::{ProjectionWorker, WorkerConfig, WorkerHandle, WorkerStats};

pub use shardline_core::{AggregateId, AggregateRef, Event, EventId, EventType};
