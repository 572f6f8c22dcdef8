//! Key layout inside the `events` store domain.
//!
//! ```text
//! eid.<sub>                         last issued event id
//! data.<sub>.<eid>                  row JSON
//! records.<sub>.<gran>.<bucket>     "eid:time,eid:time,..."
//! optimize.<query>.<sub>            checkpoint time
//! optimize_eid.<query>.<sub>        checkpoint event id
//! ```
//!
//! Event ids and bucket indexes are zero-padded to ten digits so that a
//! prefix scan returns them in numeric order.

use hw_common::{EventId, EVENT_ID_WIDTH};

pub fn eid(subscriber: &str) -> String {
    format!("eid.{}", subscriber)
}

pub fn data_prefix(subscriber: &str) -> String {
    format!("data.{}.", subscriber)
}

pub fn data(subscriber: &str, id: EventId) -> String {
    format!("data.{}.{}", subscriber, id.to_key())
}

pub fn records_prefix(subscriber: &str) -> String {
    format!("records.{}.", subscriber)
}

pub fn records(subscriber: &str, granularity: u64, index: u64) -> String {
    format!(
        "records.{}.{}.{:0width$}",
        subscriber,
        granularity,
        index,
        width = EVENT_ID_WIDTH
    )
}

pub fn optimize_time(query: &str, subscriber: &str) -> String {
    format!("optimize.{}.{}", query, subscriber)
}

pub fn optimize_eid(query: &str, subscriber: &str) -> String {
    format!("optimize_eid.{}.{}", query, subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(eid("file_events"), "eid.file_events");
        assert_eq!(data("file_events", EventId(3)), "data.file_events.0000000003");
        assert_eq!(records("file_events", 60, 2), "records.file_events.60.0000000002");
        assert_eq!(optimize_time("pack_q", "file_events"), "optimize.pack_q.file_events");
        assert_eq!(optimize_eid("pack_q", "file_events"), "optimize_eid.pack_q.file_events");
    }

    #[test]
    fn test_prefixes_do_not_leak_between_subscribers() {
        // "file" must not match keys of "file_x" when scanning.
        assert!(!data("file_x_events", EventId(1)).starts_with(&data_prefix("file")));
        assert!(records("file_events", 60, 0).starts_with(&records_prefix("file_events")));
    }
}
