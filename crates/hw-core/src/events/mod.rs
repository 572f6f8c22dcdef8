//! Event recording and time-indexed retrieval.
//!
//! Publishers fire typed events; subscribers turn them into rows, persist
//! them under monotonically increasing ids and index them by time in
//! fixed-granularity buckets. Reads plan the buckets overlapping a window,
//! resolve ids and filter on exact time. Retention bounds the buffer by age
//! and count, and per-query checkpoints let scheduled queries see only what
//! is new since their last run.

pub mod allocator;
pub mod checkpoint;
pub mod clock;
pub mod factory;
pub mod forward;
pub mod index;
pub mod keys;
pub mod manual;
pub mod publisher;
pub mod records;
pub mod retention;
pub mod subscriber;

pub use allocator::IdAllocator;
pub use checkpoint::{CheckpointStore, OptimizeCheckpoint};
pub use clock::{Clock, ManualClock, SystemClock};
pub use factory::{min_expiration_for, schedule_for, EventFactory};
pub use forward::{
    ChannelForwarder, EventForwarder, FanoutForwarder, ForwardedEvent, JsonlForwarder,
};
pub use index::{
    BucketKey, IndexedRecord, PromotionReport, Sweep, TimeIndex, GRANULARITIES,
    PROMOTE_MIN_BUCKETS,
};
pub use manual::{ManualPublisher, RowSubscriber};
pub use publisher::{
    AnyPublisher, EventEnvelope, EventPublisher, PublisherRuntime, Subscription,
};
pub use records::RecordStore;
pub use retention::{
    ExpiryReport, RetentionManager, RetentionPolicy, RetentionReason, EVENTS_CHECKPOINT,
};
pub use subscriber::{
    validate_subscriber_name, AnySubscriber, ConstraintOp, EventSubscriber, QueryContext,
    QueryRequest, SubscriberOptions, SubscriberPlugin, SubscriberState, SubscriberStats,
    TimeConstraint,
};
