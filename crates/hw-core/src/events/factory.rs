//! Registry of publishers and subscribers.
//!
//! The factory owns every runtime publisher and every subscriber, applies the
//! events configuration at registration, and routes reads by table name.

use std::any::type_name;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use hw_common::{Error, EventId, EventTime, Result, Row};
use hw_config::{EventsConfig, ScheduledQuery};
use hw_store::Store;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::forward::EventForwarder;
use super::publisher::{AnyPublisher, EventPublisher, PublisherRuntime};
use super::retention::ExpiryReport;
use super::subscriber::{
    validate_subscriber_name, AnySubscriber, EventSubscriber, QueryContext, QueryRequest,
    SubscriberOptions, SubscriberPlugin, SubscriberStats,
};

/// Retention floor guaranteeing a query running every `max_interval`
/// seconds sees each event before it expires.
///
/// Three intervals, then pushed to the next whole minute.
pub fn min_expiration_for(max_interval: u64) -> u64 {
    if max_interval == 0 {
        return 0;
    }
    let floor = max_interval.saturating_mul(3);
    floor.saturating_add(60 - floor % 60)
}

/// Schedule-derived `(min_expiration, query_count)` for one table.
pub fn schedule_for(schedule: &[ScheduledQuery], table: &str) -> (u64, usize) {
    let readers: Vec<&ScheduledQuery> = schedule
        .iter()
        .filter(|q| q.tables.iter().any(|t| t == table))
        .collect();
    let max_interval = readers.iter().map(|q| q.interval).max().unwrap_or(0);
    (min_expiration_for(max_interval), readers.len())
}

pub struct EventFactory {
    config: EventsConfig,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    publishers: RwLock<BTreeMap<String, Arc<dyn AnyPublisher>>>,
    subscribers: RwLock<BTreeMap<String, Arc<dyn AnySubscriber>>>,
    schedule: RwLock<Vec<ScheduledQuery>>,
    forwarders: Mutex<Vec<Arc<dyn EventForwarder>>>,
}

impl EventFactory {
    pub fn new(config: EventsConfig, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        let schedule = config.schedule.clone();
        Self {
            config,
            store,
            clock,
            publishers: RwLock::new(BTreeMap::new()),
            subscribers: RwLock::new(BTreeMap::new()),
            schedule: RwLock::new(schedule),
            forwarders: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EventsConfig {
        &self.config
    }

    /// Register a publisher and, unless events are disabled, set it up.
    pub fn register_publisher<P: EventPublisher>(
        &self,
        publisher: P,
    ) -> Result<Arc<PublisherRuntime<P>>> {
        let mut publishers = write(&self.publishers);
        let name = publisher.type_name().to_string();
        if publishers.contains_key(&name) {
            return Err(Error::DuplicatePublisher(name));
        }

        let runtime = Arc::new(PublisherRuntime::new(publisher, self.clock.clone()));
        if self.config.disable_events {
            debug!(publisher = %name, "events disabled; skipping publisher set-up");
        } else {
            runtime.publisher().set_up()?;
        }
        publishers.insert(name.clone(), runtime.clone());
        debug!(publisher = %name, "publisher registered");
        Ok(runtime)
    }

    /// Register a subscriber against its already-registered publisher.
    ///
    /// A subscriber disabled by configuration is registered `Paused`.
    pub fn register_subscriber<S: SubscriberPlugin>(
        &self,
        plugin: S,
    ) -> Result<Arc<EventSubscriber<S>>> {
        let name = plugin.name().to_string();
        validate_subscriber_name(&name)?;

        let mut subscribers = write(&self.subscribers);
        if subscribers.contains_key(&name) {
            return Err(Error::DuplicateSubscriber(name));
        }
        let runtime = self.find_runtime::<S::Publisher>()?;

        let options = SubscriberOptions::from_config(&self.config);
        let subscriber = Arc::new(
            EventSubscriber::new(plugin, self.store.clone(), options)?
                .with_clock(self.clock.clone()),
        );

        let (min_expiration, query_count) = schedule_for(&read(&self.schedule), &name);
        subscriber.set_schedule(min_expiration, query_count);
        for forwarder in lock(&self.forwarders).iter() {
            subscriber.add_forwarder(forwarder.clone());
        }

        let enabled = !self.config.disable_events
            && self
                .config
                .subscriber_enabled(&name, subscriber.plugin().disabled_by_default());
        if enabled {
            subscriber.init(runtime)?;
        } else {
            subscriber.pause();
            info!(subscriber = %name, "subscriber disabled by configuration");
        }

        subscribers.insert(name, subscriber.clone());
        Ok(subscriber)
    }

    /// Apply a new query schedule to every subscriber.
    pub fn configure(&self, schedule: &[ScheduledQuery]) {
        *write(&self.schedule) = schedule.to_vec();
        for (name, subscriber) in read(&self.subscribers).iter() {
            let (min_expiration, query_count) = schedule_for(schedule, name);
            if self.config.events_expiry > 0 && self.config.events_expiry < min_expiration {
                warn!(
                    subscriber = %name,
                    events_expiry = self.config.events_expiry,
                    min_expiration,
                    "configured expiry is shorter than the schedule allows; extending"
                );
            }
            subscriber.set_schedule(min_expiration, query_count);
        }
    }

    /// Attach a forwarder to current and future subscribers.
    pub fn add_forwarder(&self, forwarder: Arc<dyn EventForwarder>) {
        for subscriber in read(&self.subscribers).values() {
            subscriber.add_forwarder(forwarder.clone());
        }
        lock(&self.forwarders).push(forwarder);
    }

    pub fn subscriber(&self, name: &str) -> Result<Arc<dyn AnySubscriber>> {
        read(&self.subscribers)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownSubscriber(name.to_string()))
    }

    /// Registered subscriber names, sorted.
    pub fn names(&self) -> Vec<String> {
        read(&self.subscribers).keys().cloned().collect()
    }

    /// Registered publisher type names, sorted.
    pub fn publisher_types(&self) -> Vec<String> {
        read(&self.publishers).keys().cloned().collect()
    }

    pub fn add(&self, name: &str, row: Row, time: EventTime) -> Result<EventId> {
        self.subscriber(name)?.add(row, time)
    }

    pub fn gen_rows(&self, name: &str, request: &QueryRequest) -> Result<Vec<Row>> {
        self.subscriber(name)?.gen_rows(request)
    }

    pub fn gen_table(&self, name: &str, context: &QueryContext) -> Result<Vec<Row>> {
        self.subscriber(name)?.gen_table(context)
    }

    pub fn expire(&self, name: &str) -> Result<ExpiryReport> {
        self.subscriber(name)?.expire()
    }

    pub fn stats(&self, name: &str) -> Result<SubscriberStats> {
        self.subscriber(name)?.stats()
    }

    /// Tear down every subscriber, then end every publisher.
    pub fn end(&self) {
        let subscribers = std::mem::take(&mut *write(&self.subscribers));
        for subscriber in subscribers.values() {
            subscriber.tear_down();
        }
        let publishers = std::mem::take(&mut *write(&self.publishers));
        for publisher in publishers.values() {
            publisher.end();
        }
        debug!(
            subscribers = subscribers.len(),
            publishers = publishers.len(),
            "event factory ended"
        );
    }

    fn find_runtime<P: EventPublisher>(&self) -> Result<Arc<PublisherRuntime<P>>> {
        read(&self.publishers)
            .values()
            .find_map(|p| p.clone().into_any().downcast::<PublisherRuntime<P>>().ok())
            .ok_or_else(|| Error::UnknownPublisher(type_name::<P>().to_string()))
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
