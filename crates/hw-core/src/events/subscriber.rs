//! The event subscriber: records events from a publisher and serves them
//! back as time-filtered rows.
//!
//! A subscriber owns one namespace in the store (its name). Writes go
//! through a single per-subscriber lock: id allocation, row persistence and
//! indexing happen together so readers never see an id without its row.
//! Reads hold the lock only while planning and resolving ids.
//!
//! State machine:
//!
//! ```text
//! Uninitialized -> Subscribed -> Active <-> Expiring | Optimizing
//!        |                          |
//!        +--> Paused                +--> Stopped
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use hw_common::{row, Error, EventId, EventTime, Result, Row, EID_FIELD, TIME_FIELD};
use hw_config::EventsConfig;
use hw_store::Store;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::allocator::IdAllocator;
use super::checkpoint::{CheckpointStore, OptimizeCheckpoint};
use super::clock::{Clock, SystemClock};
use super::forward::{EventForwarder, ForwardedEvent};
use super::index::{IndexedRecord, TimeIndex};
use super::publisher::{EventEnvelope, EventPublisher, PublisherRuntime, Subscription};
use super::records::RecordStore;
use super::retention::{ExpiryReport, RetentionManager, RetentionPolicy, EVENTS_CHECKPOINT};

/// Suffix every subscriber name carries.
pub const SUBSCRIBER_SUFFIX: &str = hw_config::events::SUBSCRIBER_SUFFIX;

type SubscriptionContextOf<S> =
    <<S as SubscriberPlugin>::Publisher as EventPublisher>::SubscriptionContext;
type EventContextOf<S> = <<S as SubscriberPlugin>::Publisher as EventPublisher>::EventContext;

/// The table-specific half of a subscriber.
pub trait SubscriberPlugin: Send + Sync + 'static {
    type Publisher: EventPublisher;

    /// Table name; must end in `_events`.
    fn name(&self) -> &str;

    /// Whether the subscriber stays off unless configuration enables it.
    fn disabled_by_default(&self) -> bool {
        false
    }

    /// Adjust the configured retention bounds for this table.
    fn retention(&self, configured: RetentionPolicy) -> RetentionPolicy {
        configured
    }

    /// Subscriptions to register with the publisher on init.
    fn subscriptions(&self) -> Vec<SubscriptionContextOf<Self>>;

    /// Turn a published event into a row; `None` drops it.
    fn to_row(
        &self,
        event: &EventEnvelope<EventContextOf<Self>>,
        subscription: &SubscriptionContextOf<Self>,
    ) -> Option<Row>;
}

/// Lifecycle state of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberState {
    Uninitialized,
    Subscribed,
    Active,
    Expiring,
    Optimizing,
    Paused,
    Stopped,
}

impl SubscriberState {
    fn accepts_events(self) -> bool {
        !matches!(self, SubscriberState::Paused | SubscriberState::Stopped)
    }
}

impl std::fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubscriberState::Uninitialized => "uninitialized",
            SubscriberState::Subscribed => "subscribed",
            SubscriberState::Active => "active",
            SubscriberState::Expiring => "expiring",
            SubscriberState::Optimizing => "optimizing",
            SubscriberState::Paused => "paused",
            SubscriberState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Construction-time knobs for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberOptions {
    pub max_events: u64,
    pub expiry_seconds: u64,
    /// Serve repeated named queries only new events.
    pub optimize: bool,
    /// Fold closed index spans into coarser buckets during expiry cycles.
    pub promote: bool,
}

impl SubscriberOptions {
    pub fn from_config(config: &EventsConfig) -> Self {
        Self {
            max_events: config.events_max,
            expiry_seconds: config.events_expiry,
            optimize: config.events_optimize,
            promote: true,
        }
    }
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self::from_config(&EventsConfig::default())
    }
}

/// A read of buffered events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRequest {
    /// Inclusive lower time bound.
    pub start: Option<EventTime>,
    /// Inclusive upper time bound; `None` is open-ended.
    pub stop: Option<EventTime>,
    /// Name of the scheduled query performing the read.
    pub query: Option<String>,
}

impl QueryRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn range(start: EventTime, stop: EventTime) -> Self {
        Self {
            start: Some(start),
            stop: Some(stop),
            query: None,
        }
    }

    pub fn named(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }
}

/// Comparison applied to the `time` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintOp {
    Equals,
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeConstraint {
    pub op: ConstraintOp,
    pub value: EventTime,
}

/// Constraints pushed down from the SQL layer for one table scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryContext {
    pub constraints: Vec<TimeConstraint>,
    pub query: Option<String>,
}

impl QueryContext {
    pub fn with_constraint(mut self, op: ConstraintOp, value: EventTime) -> Self {
        self.constraints.push(TimeConstraint { op, value });
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Fold the constraints into time bounds.
    ///
    /// Returns `None` when no time can satisfy them all.
    pub fn to_request(&self) -> Option<QueryRequest> {
        let mut start: Option<EventTime> = None;
        let mut stop: Option<EventTime> = None;
        let raise = |bound: &mut Option<EventTime>, v: EventTime| {
            *bound = Some(bound.map_or(v, |b| b.max(v)));
        };
        let lower = |bound: &mut Option<EventTime>, v: EventTime| {
            *bound = Some(bound.map_or(v, |b| b.min(v)));
        };

        for c in &self.constraints {
            match c.op {
                ConstraintOp::Equals => {
                    raise(&mut start, c.value);
                    lower(&mut stop, c.value);
                }
                ConstraintOp::GreaterThan => raise(&mut start, c.value.checked_add(1)?),
                ConstraintOp::GreaterThanOrEquals => raise(&mut start, c.value),
                ConstraintOp::LessThan => lower(&mut stop, c.value.checked_sub(1)?),
                ConstraintOp::LessThanOrEquals => lower(&mut stop, c.value),
            }
        }

        if let (Some(s), Some(e)) = (start, stop) {
            if s > e {
                return None;
            }
        }
        Some(QueryRequest {
            start,
            stop,
            query: self.query.clone(),
        })
    }
}

/// Point-in-time view of a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberStats {
    pub name: String,
    pub state: SubscriberState,
    pub records: usize,
    pub buckets: usize,
    pub last_eid: EventId,
    pub min_expiration: u64,
    pub query_count: usize,
}

#[derive(Debug, Default)]
struct ScheduleState {
    min_expiration: u64,
    query_count: usize,
    queries: BTreeSet<String>,
}

/// Check a subscriber name: `[A-Za-z0-9_]+` ending in `_events`.
pub fn validate_subscriber_name(name: &str) -> Result<()> {
    let valid = name.len() > SUBSCRIBER_SUFFIX.len()
        && name.ends_with(SUBSCRIBER_SUFFIX)
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidSubscriber(format!(
            "{:?} must consist of letters, digits and '_' and end in {}",
            name, SUBSCRIBER_SUFFIX
        )))
    }
}

/// Records events for one table and serves them back as rows.
pub struct EventSubscriber<S: SubscriberPlugin> {
    plugin: S,
    name: String,
    options: SubscriberOptions,
    clock: Arc<dyn Clock>,
    allocator: IdAllocator,
    index: TimeIndex,
    records: RecordStore,
    checkpoints: CheckpointStore,
    retention: RetentionManager,
    // Serializes add, promotion and index rewrites.
    lock: Mutex<()>,
    state: Mutex<SubscriberState>,
    schedule: Mutex<ScheduleState>,
    forwarders: Mutex<Vec<Arc<dyn EventForwarder>>>,
    publisher: Mutex<Option<Arc<PublisherRuntime<S::Publisher>>>>,
}

impl<S: SubscriberPlugin> EventSubscriber<S> {
    pub fn new(plugin: S, store: Arc<dyn Store>, options: SubscriberOptions) -> Result<Self> {
        let name = plugin.name().to_string();
        validate_subscriber_name(&name)?;
        Ok(Self {
            allocator: IdAllocator::new(store.clone(), name.clone()),
            index: TimeIndex::new(store.clone(), name.clone()),
            records: RecordStore::new(store.clone(), name.clone()),
            checkpoints: CheckpointStore::new(store.clone(), name.clone()),
            retention: RetentionManager::new(store, name.clone()),
            plugin,
            name,
            options,
            clock: Arc::new(SystemClock),
            lock: Mutex::new(()),
            state: Mutex::new(SubscriberState::Uninitialized),
            schedule: Mutex::new(ScheduleState::default()),
            forwarders: Mutex::new(Vec::new()),
            publisher: Mutex::new(None),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> &S {
        &self.plugin
    }

    pub fn options(&self) -> &SubscriberOptions {
        &self.options
    }

    pub fn state(&self) -> SubscriberState {
        *lock(&self.state)
    }

    pub fn last_id(&self) -> Result<EventId> {
        self.allocator.last_id()
    }

    /// Register this subscriber's subscriptions with its publisher.
    pub fn init(self: &Arc<Self>, publisher: Arc<PublisherRuntime<S::Publisher>>) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if *state != SubscriberState::Uninitialized {
                return Err(Error::AlreadyInitialized {
                    subscriber: self.name.clone(),
                });
            }
            *state = SubscriberState::Subscribed;
        }

        let contexts = self.plugin.subscriptions();
        let count = contexts.len();
        for context in contexts {
            let weak: Weak<Self> = Arc::downgrade(self);
            let subscription = Subscription::<S::Publisher>::new(
                self.name.clone(),
                context,
                move |event, sc| {
                    let Some(subscriber) = weak.upgrade() else {
                        return Ok(());
                    };
                    match subscriber.plugin.to_row(event, sc) {
                        Some(row) => subscriber.add(row, event.time).map(|_| ()),
                        None => Ok(()),
                    }
                },
            );
            publisher.add_subscription(subscription);
        }
        *lock(&self.publisher) = Some(publisher);

        let mut state = lock(&self.state);
        if *state == SubscriberState::Subscribed {
            *state = SubscriberState::Active;
        }
        debug!(subscriber = %self.name, subscriptions = count, "subscriber initialized");
        Ok(())
    }

    /// Keep the subscriber registered but inert.
    pub fn pause(&self) {
        let mut state = lock(&self.state);
        if *state != SubscriberState::Stopped {
            *state = SubscriberState::Paused;
        }
    }

    /// Remove subscriptions and stop accepting events.
    pub fn tear_down(&self) {
        *lock(&self.state) = SubscriberState::Stopped;
        if let Some(publisher) = lock(&self.publisher).take() {
            let removed = publisher.remove_subscriptions(&self.name);
            debug!(subscriber = %self.name, removed, "subscriber torn down");
        }
    }

    pub fn add_forwarder(&self, forwarder: Arc<dyn EventForwarder>) {
        lock(&self.forwarders).push(forwarder);
    }

    /// Record one event. `time == 0` stamps it with the current time.
    pub fn add(&self, mut row: Row, time: EventTime) -> Result<EventId> {
        if !self.state().accepts_events() {
            return Err(Error::NotAccepting {
                subscriber: self.name.clone(),
            });
        }
        let time = if time == 0 { self.clock.now() } else { time };

        let id = {
            let _guard = lock(&self.lock);
            let id = self.allocator.next_id()?;
            row.insert(TIME_FIELD.to_string(), time.to_string());
            row.insert(EID_FIELD.to_string(), id.to_key());

            if let Err(e) = self.records.put(id, &row) {
                error!(subscriber = %self.name, eid = %id, error = %e, "failed to store event");
                return Err(e);
            }
            if let Err(e) = self.index.insert(id, time) {
                error!(subscriber = %self.name, eid = %id, error = %e, "failed to index event");
                // An unindexed row would never be served or expired.
                if let Err(cleanup) = self.records.delete(id) {
                    warn!(
                        subscriber = %self.name,
                        eid = %id,
                        error = %cleanup,
                        "failed to remove unindexed event"
                    );
                }
                return Err(e);
            }
            id
        };

        if id.value() % EVENTS_CHECKPOINT == 0 {
            self.expire_overflow();
        }
        self.forward(&row);
        Ok(id)
    }

    /// Rows matching the request, ordered by event id.
    pub fn gen_rows(&self, request: &QueryRequest) -> Result<Vec<Row>> {
        let now = self.clock.now();
        self.expire_check(now);

        let optimize_query = request.query.as_deref().filter(|_| {
            self.options.optimize && request.start.is_none() && request.stop.is_none()
        });

        let Some(query) = optimize_query else {
            return self
                .read_window(request.start.unwrap_or(0), request.stop, None)
                .map(|(rows, _)| rows);
        };

        self.record_query(query);
        let checkpoint = self.checkpoints.load(query)?;
        let busy = self.enter(SubscriberState::Optimizing);
        let result = self
            .read_window(checkpoint.optimize_time, Some(now), Some(&checkpoint))
            .and_then(|(rows, delivered_max)| {
                let next = checkpoint.advance(now, delivered_max);
                self.checkpoints.store(query, &next)?;
                debug!(
                    subscriber = %self.name,
                    query,
                    rows = rows.len(),
                    optimize_time = next.optimize_time,
                    optimize_eid = %next.optimize_eid,
                    "optimized read"
                );
                Ok(rows)
            });
        if busy {
            self.leave(SubscriberState::Optimizing);
        }
        result
    }

    /// Rows for a table scan with pushed-down `time` constraints.
    pub fn gen_table(&self, context: &QueryContext) -> Result<Vec<Row>> {
        match context.to_request() {
            Some(request) => self.gen_rows(&request),
            None => Ok(Vec::new()),
        }
    }

    /// Run a full retention cycle now, regardless of schedule coverage.
    pub fn expire(&self) -> Result<ExpiryReport> {
        self.expire_cycle(self.clock.now())
    }

    /// Retention bounds currently in force.
    pub fn retention_policy(&self) -> RetentionPolicy {
        let min_expiration = lock(&self.schedule).min_expiration;
        self.plugin.retention(RetentionPolicy {
            max_events: self.options.max_events,
            expiry_seconds: self.options.expiry_seconds,
            min_expiration,
        })
    }

    /// Apply schedule-derived retention floor and the number of queries
    /// that must read before expiry may run. Clears the set of queries seen.
    pub fn set_schedule(&self, min_expiration: u64, query_count: usize) {
        let mut schedule = lock(&self.schedule);
        schedule.min_expiration = min_expiration;
        schedule.query_count = query_count;
        schedule.queries.clear();
    }

    /// Whether every scheduled query reading this table has read it since
    /// the last schedule update.
    pub fn executed_all_queries(&self) -> bool {
        let schedule = lock(&self.schedule);
        schedule.queries.len() >= schedule.query_count
    }

    pub fn stats(&self) -> Result<SubscriberStats> {
        let (min_expiration, query_count) = {
            let schedule = lock(&self.schedule);
            (schedule.min_expiration, schedule.query_count)
        };
        Ok(SubscriberStats {
            name: self.name.clone(),
            state: self.state(),
            records: self.records.count()?,
            buckets: self.index.buckets()?.len(),
            last_eid: self.allocator.last_id()?,
            min_expiration,
            query_count,
        })
    }

    fn read_window(
        &self,
        start: EventTime,
        stop: Option<EventTime>,
        checkpoint: Option<&OptimizeCheckpoint>,
    ) -> Result<(Vec<Row>, Option<EventId>)> {
        let entries = {
            let _guard = lock(&self.lock);
            let plan = self.index.plan(start, stop.unwrap_or(0))?;
            self.index.records(&plan)?
        };

        let selected: Vec<IndexedRecord> = entries
            .into_iter()
            .filter(|r| r.time >= start && stop.map_or(true, |stop| r.time <= stop))
            .filter(|r| !checkpoint.is_some_and(|cp| cp.already_delivered(r)))
            .collect();

        let mut rows = Vec::with_capacity(selected.len());
        for record in &selected {
            match self.records.get(record.id) {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => debug!(
                    subscriber = %self.name,
                    eid = %record.id,
                    "indexed event has no row"
                ),
                Err(e) => warn!(
                    subscriber = %self.name,
                    eid = %record.id,
                    error = %e,
                    "failed to read event"
                ),
            }
        }
        Ok((rows, selected.last().map(|r| r.id)))
    }

    fn expire_check(&self, now: EventTime) {
        if !self.executed_all_queries() {
            debug!(
                subscriber = %self.name,
                "deferring expiry until all scheduled queries have read"
            );
            return;
        }
        if let Err(e) = self.expire_cycle(now) {
            warn!(subscriber = %self.name, error = %e, "retention cycle failed");
        }
    }

    fn expire_cycle(&self, now: EventTime) -> Result<ExpiryReport> {
        let policy = self.retention_policy();
        let busy = self.enter(SubscriberState::Expiring);
        let result = {
            let _guard = lock(&self.lock);
            self.retention.expire(&policy, now).and_then(|report| {
                if self.options.promote {
                    self.index.promote(now)?;
                }
                Ok(report)
            })
        };
        if busy {
            self.leave(SubscriberState::Expiring);
        }
        result
    }

    fn expire_overflow(&self) {
        let policy = self.retention_policy();
        let _guard = lock(&self.lock);
        if let Err(e) = self.retention.expire_count(&policy) {
            warn!(subscriber = %self.name, error = %e, "count retention check failed");
        }
    }

    fn record_query(&self, query: &str) {
        let mut schedule = lock(&self.schedule);
        if !schedule.queries.contains(query) {
            schedule.queries.insert(query.to_string());
        }
    }

    fn forward(&self, row: &Row) {
        let forwarders = lock(&self.forwarders).clone();
        if forwarders.is_empty() {
            return;
        }
        match row::to_json(row) {
            Ok(line) => {
                let event = ForwardedEvent {
                    subscriber: self.name.clone(),
                    line,
                };
                for forwarder in forwarders {
                    forwarder.forward(&event);
                }
            }
            Err(e) => warn!(
                subscriber = %self.name,
                error = %e,
                "failed to serialize event for forwarding"
            ),
        }
    }

    // Move Active -> busy; reports whether the transition happened.
    fn enter(&self, busy: SubscriberState) -> bool {
        let mut state = lock(&self.state);
        if *state == SubscriberState::Active {
            *state = busy;
            true
        } else {
            false
        }
    }

    fn leave(&self, busy: SubscriberState) {
        let mut state = lock(&self.state);
        if *state == busy {
            *state = SubscriberState::Active;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Type-erased subscriber handle for the registry.
pub trait AnySubscriber: Send + Sync {
    fn name(&self) -> &str;
    fn state(&self) -> SubscriberState;
    fn add(&self, row: Row, time: EventTime) -> Result<EventId>;
    fn gen_rows(&self, request: &QueryRequest) -> Result<Vec<Row>>;
    fn gen_table(&self, context: &QueryContext) -> Result<Vec<Row>>;
    fn expire(&self) -> Result<ExpiryReport>;
    fn stats(&self) -> Result<SubscriberStats>;
    fn retention_policy(&self) -> RetentionPolicy;
    fn set_schedule(&self, min_expiration: u64, query_count: usize);
    fn add_forwarder(&self, forwarder: Arc<dyn EventForwarder>);
    fn pause(&self);
    fn tear_down(&self);
}

impl<S: SubscriberPlugin> AnySubscriber for EventSubscriber<S> {
    fn name(&self) -> &str {
        EventSubscriber::name(self)
    }

    fn state(&self) -> SubscriberState {
        EventSubscriber::state(self)
    }

    fn add(&self, row: Row, time: EventTime) -> Result<EventId> {
        EventSubscriber::add(self, row, time)
    }

    fn gen_rows(&self, request: &QueryRequest) -> Result<Vec<Row>> {
        EventSubscriber::gen_rows(self, request)
    }

    fn gen_table(&self, context: &QueryContext) -> Result<Vec<Row>> {
        EventSubscriber::gen_table(self, context)
    }

    fn expire(&self) -> Result<ExpiryReport> {
        EventSubscriber::expire(self)
    }

    fn stats(&self) -> Result<SubscriberStats> {
        EventSubscriber::stats(self)
    }

    fn retention_policy(&self) -> RetentionPolicy {
        EventSubscriber::retention_policy(self)
    }

    fn set_schedule(&self, min_expiration: u64, query_count: usize) {
        EventSubscriber::set_schedule(self, min_expiration, query_count)
    }

    fn add_forwarder(&self, forwarder: Arc<dyn EventForwarder>) {
        EventSubscriber::add_forwarder(self, forwarder)
    }

    fn pause(&self) {
        EventSubscriber::pause(self)
    }

    fn tear_down(&self) {
        EventSubscriber::tear_down(self)
    }
}
