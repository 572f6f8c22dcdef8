//! A publisher fed by hand, and a subscriber that stores rows as given.
//!
//! Used by the CLI to record events from the command line, and handy in
//! tests that need a real publisher without an OS mechanism behind it.

use hw_common::Row;

use super::publisher::{EventEnvelope, EventPublisher};
use super::subscriber::SubscriberPlugin;

/// Publisher whose events are rows fired by the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualPublisher;

impl EventPublisher for ManualPublisher {
    type SubscriptionContext = ();
    type EventContext = Row;

    fn type_name(&self) -> &str {
        "manual"
    }
}

/// Subscriber storing each fired row unchanged.
#[derive(Debug, Clone)]
pub struct RowSubscriber {
    name: String,
    disabled_by_default: bool,
}

impl RowSubscriber {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            disabled_by_default: false,
        }
    }

    /// Require explicit enabling in configuration.
    pub fn opt_in(mut self) -> Self {
        self.disabled_by_default = true;
        self
    }
}

impl SubscriberPlugin for RowSubscriber {
    type Publisher = ManualPublisher;

    fn name(&self) -> &str {
        &self.name
    }

    fn disabled_by_default(&self) -> bool {
        self.disabled_by_default
    }

    fn subscriptions(&self) -> Vec<()> {
        vec![()]
    }

    fn to_row(&self, event: &EventEnvelope<Row>, _subscription: &()) -> Option<Row> {
        Some(event.context.clone())
    }
}
