//! Event publishers and their subscription runtime.
//!
//! A publisher turns some OS mechanism into typed event contexts. The engine
//! only sees the [`EventPublisher`] trait: the mechanism itself lives outside
//! this crate. [`PublisherRuntime`] holds a publisher's subscriptions and
//! dispatches each fired event to every matching one.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hw_common::{EventTime, Result};
use tracing::{debug, warn};

use super::clock::Clock;

/// Source of typed events.
pub trait EventPublisher: Send + Sync + 'static {
    /// What a subscriber asks for (paths, facilities, masks...).
    type SubscriptionContext: Send + Sync + 'static;
    /// What the publisher reports for one event.
    type EventContext: Send + Sync + 'static;

    /// Stable publisher type name, e.g. `"inotify"`.
    fn type_name(&self) -> &str;

    fn set_up(&self) -> Result<()> {
        Ok(())
    }

    fn tear_down(&self) {}

    /// Whether an event matches a subscription.
    fn should_fire(&self, _sc: &Self::SubscriptionContext, _ec: &Self::EventContext) -> bool {
        true
    }
}

/// A fired event with the id and time the runtime assigned.
#[derive(Debug, Clone)]
pub struct EventEnvelope<E> {
    /// Per-publisher sequence number, starting at 1.
    pub id: u64,
    pub time: EventTime,
    pub context: E,
}

type Callback<P> = Box<
    dyn Fn(
            &EventEnvelope<<P as EventPublisher>::EventContext>,
            &<P as EventPublisher>::SubscriptionContext,
        ) -> Result<()>
        + Send
        + Sync,
>;

/// One subscriber's interest in a publisher.
pub struct Subscription<P: EventPublisher> {
    pub subscriber: String,
    pub context: P::SubscriptionContext,
    callback: Callback<P>,
}

impl<P: EventPublisher> Subscription<P> {
    pub fn new<F>(
        subscriber: impl Into<String>,
        context: P::SubscriptionContext,
        callback: F,
    ) -> Self
    where
        F: Fn(&EventEnvelope<P::EventContext>, &P::SubscriptionContext) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        Self {
            subscriber: subscriber.into(),
            context,
            callback: Box::new(callback),
        }
    }
}

/// Subscription list and dispatch for one publisher.
pub struct PublisherRuntime<P: EventPublisher> {
    publisher: P,
    subscriptions: Mutex<Vec<Arc<Subscription<P>>>>,
    next_event_id: AtomicU64,
    ending: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl<P: EventPublisher> PublisherRuntime<P> {
    pub fn new(publisher: P, clock: Arc<dyn Clock>) -> Self {
        Self {
            publisher,
            subscriptions: Mutex::new(Vec::new()),
            next_event_id: AtomicU64::new(0),
            ending: AtomicBool::new(false),
            clock,
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn add_subscription(&self, subscription: Subscription<P>) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|p| p.into_inner());
        subscriptions.push(Arc::new(subscription));
    }

    /// Drop every subscription belonging to `subscriber`.
    pub fn remove_subscriptions(&self, subscriber: &str) -> usize {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|p| p.into_inner());
        let before = subscriptions.len();
        subscriptions.retain(|s| s.subscriber != subscriber);
        before - subscriptions.len()
    }

    pub fn num_subscriptions(&self) -> usize {
        self.subscriptions.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_ending(&self) -> bool {
        self.ending.load(Ordering::SeqCst)
    }

    /// Dispatch an event to every matching subscription.
    ///
    /// `time == 0` stamps the event with the current time. Callback errors
    /// are logged and do not stop dispatch. Returns how many subscriptions
    /// received the event.
    pub fn fire(&self, context: P::EventContext, time: EventTime) -> usize {
        if self.is_ending() {
            return 0;
        }
        let envelope = EventEnvelope {
            id: self.next_event_id.fetch_add(1, Ordering::SeqCst) + 1,
            time: if time == 0 { self.clock.now() } else { time },
            context,
        };

        // Dispatch outside the lock so callbacks may touch subscriptions.
        let subscriptions: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        let mut delivered = 0;
        for subscription in subscriptions {
            if !self.publisher.should_fire(&subscription.context, &envelope.context) {
                continue;
            }
            delivered += 1;
            if let Err(e) = (subscription.callback)(&envelope, &subscription.context) {
                warn!(
                    publisher = %self.publisher.type_name(),
                    subscriber = %subscription.subscriber,
                    error = %e,
                    "subscriber callback failed"
                );
            }
        }
        delivered
    }

    /// Stop dispatching, tear the publisher down and drop all subscriptions.
    pub fn end(&self) {
        if self.ending.swap(true, Ordering::SeqCst) {
            return;
        }
        self.publisher.tear_down();
        self.subscriptions.lock().unwrap_or_else(|p| p.into_inner()).clear();
        debug!(publisher = %self.publisher.type_name(), "publisher ended");
    }
}

/// Type-erased view of a [`PublisherRuntime`] for the registry.
pub trait AnyPublisher: Send + Sync {
    fn type_name(&self) -> &str;
    fn set_up(&self) -> Result<()>;
    fn end(&self);
    fn num_subscriptions(&self) -> usize;
    fn remove_subscriptions(&self, subscriber: &str) -> usize;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<P: EventPublisher> AnyPublisher for PublisherRuntime<P> {
    fn type_name(&self) -> &str {
        self.publisher.type_name()
    }

    fn set_up(&self) -> Result<()> {
        self.publisher.set_up()
    }

    fn end(&self) {
        PublisherRuntime::end(self)
    }

    fn num_subscriptions(&self) -> usize {
        PublisherRuntime::num_subscriptions(self)
    }

    fn remove_subscriptions(&self, subscriber: &str) -> usize {
        PublisherRuntime::remove_subscriptions(self, subscriber)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
