//! End-to-end scenarios for the event engine over real stores.

mod support;

use std::sync::Arc;

use hw_common::EventId;
use hw_core::events::{
    BucketKey, ConstraintOp, EventFactory, ManualClock, ManualPublisher, QueryContext, QueryRequest,
    RowSubscriber, SubscriberOptions, TimeIndex,
};
use hw_config::{EventsConfig, ScheduledQuery};
use hw_store::{DirStore, MemoryStore, Store};
use support::{eids, options, row, subscriber, NOW};
use tempfile::TempDir;

fn fine(index: u64) -> BucketKey {
    BucketKey {
        granularity: 60,
        index,
    }
}

#[test]
fn plan_scenario_selects_minute_buckets() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let index = TimeIndex::new(store, "file_events");
    for (i, t) in [2u64, 11, 61, 3601, 7201].into_iter().enumerate() {
        index.insert(EventId(i as u64 + 1), t).unwrap();
    }

    assert_eq!(
        index.plan(0, 10_800).unwrap(),
        vec![fine(0), fine(1), fine(60), fine(120)]
    );
    assert_eq!(index.plan(0, 5).unwrap(), vec![fine(0)]);
}

#[test]
fn age_expiry_scenario() {
    let (_clock, sub) = subscriber(Arc::new(MemoryStore::new()), options(0, 10));
    sub.add(row(&[("path", "/old")]), NOW - 1000).unwrap();
    sub.add(row(&[("path", "/new")]), NOW - 1).unwrap();

    let report = sub.expire().unwrap();
    assert_eq!(report.expired_by_age, 1);
    assert_eq!(report.cutoff, Some(NOW - 10));

    let rows = sub.gen_rows(&QueryRequest::all()).unwrap();
    assert_eq!(eids(&rows), vec![2]);
    assert_eq!(rows[0]["path"], "/new");

    assert!(sub.expire().unwrap().is_noop());
}

#[test]
fn count_expiry_keeps_newest() {
    let (_clock, sub) = subscriber(Arc::new(MemoryStore::new()), options(5, 0));
    for i in 0..12 {
        sub.add(row(&[]), NOW - 100 + i).unwrap();
    }
    let report = sub.expire().unwrap();
    assert_eq!(report.expired_by_count, 7);
    assert_eq!(
        eids(&sub.gen_rows(&QueryRequest::all()).unwrap()),
        vec![8, 9, 10, 11, 12]
    );
}

#[test]
fn optimized_reads_across_cycles_deliver_each_event_once() {
    let (clock, sub) = subscriber(Arc::new(MemoryStore::new()), SubscriberOptions::default());
    let mut delivered = Vec::new();

    for cycle in 0..5u64 {
        for _ in 0..=cycle {
            sub.add(row(&[]), 0).unwrap();
        }
        delivered.extend(eids(&sub.gen_rows(&QueryRequest::named("pack_q")).unwrap()));
        // Late event stamped with the read's own second.
        sub.add(row(&[]), 0).unwrap();
        clock.advance(30);
    }
    delivered.extend(eids(&sub.gen_rows(&QueryRequest::named("pack_q")).unwrap()));

    let last = sub.last_id().unwrap().value();
    assert_eq!(delivered, (1..=last).collect::<Vec<_>>());
}

#[test]
fn reads_stay_correct_across_promotion() {
    let (_clock, sub) = subscriber(Arc::new(MemoryStore::new()), options(0, 0));
    // A closed hour, two hours before the clock.
    let hour_start = (NOW / 3600 - 2) * 3600;
    for minute in 0..20u64 {
        sub.add(row(&[]), hour_start + minute * 60 + 5).unwrap();
    }
    assert_eq!(sub.stats().unwrap().buckets, 20);

    // The read runs a retention cycle, which folds the hour.
    let window = QueryRequest::range(hour_start + 300, hour_start + 600);
    let first = sub.gen_rows(&window).unwrap();
    assert_eq!(eids(&first), vec![6, 7, 8, 9, 10]);
    assert_eq!(sub.stats().unwrap().buckets, 1);

    assert_eq!(eids(&sub.gen_rows(&window).unwrap()), eids(&first));
    assert_eq!(sub.gen_rows(&QueryRequest::all()).unwrap().len(), 20);
}

#[test]
fn table_constraints_over_dir_store() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn Store> = Arc::new(DirStore::open(dir.path()).unwrap());
    let (_clock, sub) = subscriber(store, SubscriberOptions::default());
    for t in [NOW - 300, NOW - 200, NOW - 100] {
        sub.add(row(&[("path", "/var/log/syslog")]), t).unwrap();
    }

    let ctx = QueryContext::default()
        .with_constraint(ConstraintOp::GreaterThanOrEquals, NOW - 200)
        .with_constraint(ConstraintOp::LessThan, NOW);
    assert_eq!(eids(&sub.gen_table(&ctx).unwrap()), vec![2, 3]);
}

#[test]
fn state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store: Arc<dyn Store> = Arc::new(DirStore::open(dir.path()).unwrap());
        let (_clock, sub) = subscriber(store, SubscriberOptions::default());
        sub.add(row(&[("n", "1")]), 0).unwrap();
        sub.add(row(&[("n", "2")]), 0).unwrap();
        assert_eq!(sub.gen_rows(&QueryRequest::named("q")).unwrap().len(), 2);
    }

    let store: Arc<dyn Store> = Arc::new(DirStore::open(dir.path()).unwrap());
    let (clock, sub) = subscriber(store, SubscriberOptions::default());
    assert_eq!(sub.last_id().unwrap(), EventId(2));
    clock.advance(1);
    assert_eq!(sub.add(row(&[("n", "3")]), 0).unwrap(), EventId(3));

    // The checkpoint persisted: only the new event is delivered.
    let rows = sub.gen_rows(&QueryRequest::named("q")).unwrap();
    assert_eq!(eids(&rows), vec![3]);
    assert_eq!(rows[0]["n"], "3");
}

#[test]
fn factory_routes_published_events() {
    let config = EventsConfig {
        events_expiry: 10,
        schedule: vec![ScheduledQuery {
            name: "file_watch".into(),
            interval: 60,
            tables: vec!["file_events".into()],
        }],
        ..EventsConfig::default()
    };
    let factory = EventFactory::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::new(NOW)),
    );
    let runtime = factory.register_publisher(ManualPublisher).unwrap();
    factory.register_subscriber(RowSubscriber::new("file_events")).unwrap();
    factory.register_subscriber(RowSubscriber::new("proc_events")).unwrap();

    assert_eq!(runtime.fire(row(&[("path", "/etc/passwd")]), NOW - 100), 2);

    // min_expiration (240s) outranks the 10s expiry for the scheduled table.
    let file = factory.gen_rows("file_events", &QueryRequest::named("file_watch")).unwrap();
    assert_eq!(file.len(), 1);
    assert_eq!(factory.stats("file_events").unwrap().records, 1);

    let proc_rows = factory.gen_rows("proc_events", &QueryRequest::all()).unwrap();
    assert!(proc_rows.is_empty(), "unscheduled table expires at 10s");

    factory.end();
    assert_eq!(runtime.fire(row(&[]), 0), 0);
}
