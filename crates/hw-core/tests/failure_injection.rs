//! Store failures during add, read and expiry.

mod support;

use hw_common::{Error, EventId};
use hw_core::events::{QueryRequest, SubscriberOptions};
use hw_store::{Store, EVENTS_DOMAIN};
use support::{eids, options, row, subscriber, FaultyStore, Op, NOW};

#[test]
fn allocation_failure_consumes_no_id() {
    let store = FaultyStore::new();
    let (_clock, sub) = subscriber(store.clone(), SubscriberOptions::default());

    store.fail(Op::Put, "eid.");
    assert!(matches!(
        sub.add(row(&[]), 0),
        Err(Error::AllocationFailed { .. })
    ));
    assert_eq!(sub.stats().unwrap().records, 0);

    store.heal();
    assert_eq!(sub.add(row(&[]), 0).unwrap(), EventId(1));
}

#[test]
fn row_write_failure_leaves_no_index_entry() {
    let store = FaultyStore::new();
    let (_clock, sub) = subscriber(store.clone(), SubscriberOptions::default());

    store.fail(Op::Put, "data.");
    assert!(matches!(
        sub.add(row(&[]), 0),
        Err(Error::StoreUnavailable(_))
    ));
    store.heal();

    let stats = sub.stats().unwrap();
    assert_eq!(stats.records, 0);
    assert_eq!(stats.buckets, 0);
    // The id was handed out and is not reused.
    assert_eq!(sub.add(row(&[]), 0).unwrap(), EventId(2));
}

#[test]
fn index_write_failure_removes_row() {
    let store = FaultyStore::new();
    let (_clock, sub) = subscriber(store.clone(), SubscriberOptions::default());

    store.fail(Op::Put, "records.");
    assert!(sub.add(row(&[("path", "/tmp/x")]), 0).is_err());
    store.heal();

    assert_eq!(sub.stats().unwrap().records, 0);
    sub.add(row(&[]), 0).unwrap();
    assert_eq!(eids(&sub.gen_rows(&QueryRequest::all()).unwrap()), vec![2]);
}

#[test]
fn failed_age_delete_is_retried_next_cycle() {
    let store = FaultyStore::new();
    let (_clock, sub) = subscriber(store.clone(), options(0, 10));
    sub.add(row(&[]), NOW - 1000).unwrap();
    sub.add(row(&[]), NOW - 900).unwrap();
    sub.add(row(&[]), NOW - 1).unwrap();

    store.fail(Op::Delete, "data.file_events.0000000001");
    let report = sub.expire().unwrap();
    assert_eq!(report.expired_by_age, 1);
    assert_eq!(report.failed, vec!["0000000001".to_string()]);
    assert_eq!(sub.stats().unwrap().records, 2);

    store.heal();
    let retry = sub.expire().unwrap();
    assert_eq!(retry.expired_by_age, 1);
    assert!(retry.failed.is_empty());
    assert_eq!(eids(&sub.gen_rows(&QueryRequest::all()).unwrap()), vec![3]);
}

#[test]
fn failed_count_delete_is_retried_next_cycle() {
    let store = FaultyStore::new();
    let (_clock, sub) = subscriber(store.clone(), options(2, 0));
    for i in 0..4 {
        sub.add(row(&[]), NOW - 100 + i).unwrap();
    }

    store.fail(Op::Delete, "data.file_events.0000000001");
    let report = sub.expire().unwrap();
    assert_eq!(report.expired_by_count, 1);
    assert_eq!(report.failed.len(), 1);

    store.heal();
    let retry = sub.expire().unwrap();
    assert_eq!(retry.expired_by_count, 1);
    assert_eq!(eids(&sub.gen_rows(&QueryRequest::all()).unwrap()), vec![3, 4]);
}

#[test]
fn index_scan_failure_fails_the_read() {
    let store = FaultyStore::new();
    let (_clock, sub) = subscriber(store.clone(), SubscriberOptions::default());
    sub.add(row(&[]), 0).unwrap();

    store.fail(Op::Scan, "records.");
    assert!(matches!(
        sub.gen_rows(&QueryRequest::all()),
        Err(Error::StoreUnavailable(_))
    ));
    // Adds do not scan.
    sub.add(row(&[]), 0).unwrap();

    store.heal();
    assert_eq!(sub.gen_rows(&QueryRequest::all()).unwrap().len(), 2);
}

#[test]
fn corrupt_rows_are_skipped() {
    let store = FaultyStore::new();
    let (_clock, sub) = subscriber(store.clone(), SubscriberOptions::default());
    for _ in 0..3 {
        sub.add(row(&[]), 0).unwrap();
    }
    store
        .inner()
        .put(EVENTS_DOMAIN, "data.file_events.0000000002", b"not json")
        .unwrap();

    assert_eq!(eids(&sub.gen_rows(&QueryRequest::all()).unwrap()), vec![1, 3]);
}

#[test]
fn failed_checkpoint_write_fails_the_read_and_redelivers() {
    let store = FaultyStore::new();
    let (_clock, sub) = subscriber(store.clone(), SubscriberOptions::default());
    sub.add(row(&[]), 0).unwrap();

    store.fail(Op::Put, "optimize");
    assert!(sub.gen_rows(&QueryRequest::named("q")).is_err());
    store.heal();

    assert_eq!(eids(&sub.gen_rows(&QueryRequest::named("q")).unwrap()), vec![1]);
    assert!(sub.gen_rows(&QueryRequest::named("q")).unwrap().is_empty());
    assert!(store.failures() >= 1);
}
