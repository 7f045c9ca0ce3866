//! End-to-end tests for ingestion: bundling, limits, summaries and receipts.

mod common;

use common::{payload, settle, TestHarness, T0};
use pushcore::notifications::{NotificationError, NotificationStore, Predicate};
use pushcore::pipeline::{Disposition, GenerationState, RawPayload};
use pushcore::reporting::ExecutorTag;
use pushcore::PolicyParams;
use serde_json::json;

fn policy(max_visible: usize) -> PolicyParams {
    PolicyParams {
        max_visible,
        ..PolicyParams::default()
    }
}

#[tokio::test]
async fn test_oldest_notification_evicted_over_limit() {
    let h = TestHarness::new(policy(2));

    for (i, id) in ["t0", "t1", "t2"].iter().enumerate() {
        h.clock.set(T0 + i as i64);
        let outcome = h.ingest(id);
        assert_eq!(outcome.state(), &GenerationState::Done);
    }
    settle().await;

    assert!(h.store.get("t0").unwrap().is_none());
    assert!(h.store.get("t1").unwrap().is_some());
    assert!(h.store.get("t2").unwrap().is_some());
    assert!(h.displayer.cancelled().contains(&"t0".to_string()));
    assert_eq!(h.displayer.badge(), 2);
}

#[tokio::test]
async fn test_payload_without_id_leaves_store_unchanged() {
    let h = TestHarness::new(PolicyParams::default());
    h.ingest("existing");
    let before = h.store.count(&Predicate::all()).unwrap();

    let outcome = h
        .services
        .pipeline
        .ingest(&RawPayload::default().with("title", json!("anonymous")));

    assert_eq!(outcome.disposition, Disposition::Failed);
    assert!(matches!(
        outcome.failure(),
        Some(NotificationError::InvalidPayload(_))
    ));
    assert_eq!(h.store.count(&Predicate::all()).unwrap(), before);
}

#[tokio::test]
async fn test_visible_count_never_exceeds_limit() {
    let h = TestHarness::new(policy(5));
    let mut evicted = Vec::new();
    for i in 0..20 {
        h.clock.set(T0 + i);
        let outcome = h.ingest(&format!("n{:02}", i));
        evicted.extend(outcome.evicted);
        assert!(h.store.count(&Predicate::uninteracted()).unwrap() <= 5);
    }

    let expected: Vec<String> = (0..15).map(|i| format!("n{:02}", i)).collect();
    assert_eq!(evicted, expected);
}

#[tokio::test]
async fn test_same_second_arrivals_evicted_in_insertion_order() {
    let h = TestHarness::new(policy(1));
    h.ingest("first");
    let outcome = h.ingest("second");
    assert_eq!(outcome.evicted, vec!["first".to_string()]);
    assert_eq!(outcome.disposition, Disposition::Displayed);
}

#[tokio::test]
async fn test_token_refresh_is_not_a_notification() {
    let h = TestHarness::new(PolicyParams::default());
    let outcome = h.services.pipeline.ingest(
        &RawPayload::default()
            .with("from", json!("google.com/iid"))
            .with("id", json!("token")),
    );

    assert_eq!(outcome.disposition, Disposition::Ignored);
    assert_eq!(h.store.count(&Predicate::all()).unwrap(), 0);
}

#[tokio::test]
async fn test_duplicate_delivery_keeps_single_record() {
    let h = TestHarness::new(PolicyParams::default());
    h.ingest("dup");
    h.clock.advance(5);
    h.ingest("dup");

    assert_eq!(h.store.count(&Predicate::all()).unwrap(), 1);
    let record = h.store.get("dup").unwrap().unwrap();
    assert_eq!(record.created_at, T0);

    h.services.opens.report_open("dup").unwrap();
    let outcome = h.ingest("dup");
    assert_eq!(outcome.disposition, Disposition::Duplicate);
    assert!(h.store.get("dup").unwrap().unwrap().opened);
}

#[tokio::test]
async fn test_group_summary_shown_and_withdrawn() {
    let h = TestHarness::new(PolicyParams::default());
    for id in ["g1", "g2"] {
        h.services
            .pipeline
            .ingest(&payload(id).with("grp", json!("chat")));
    }
    settle().await;
    assert_eq!(h.displayer.display_count("summary:chat"), 1);

    h.services.opens.report_dismissed("g1").unwrap();
    h.services.opens.report_open("g2").unwrap();

    assert!(h.store.get("summary:chat").unwrap().is_none());
    assert!(h
        .displayer
        .cancelled()
        .contains(&"summary:chat".to_string()));
    assert_eq!(h.displayer.badge(), 0);
}

#[tokio::test]
async fn test_receipts_sent_once_for_new_notifications() {
    let h = TestHarness::new(PolicyParams::default());
    h.ingest("r1");
    h.ingest("r1");
    h.ingest("r2");

    let transport = h.transport.clone();
    h.services.flush_operations().await;

    let mut receipts = transport.attempts_for(ExecutorTag::TrackReceived);
    receipts.sort();
    assert_eq!(receipts, vec!["r1".to_string(), "r2".to_string()]);
}

#[tokio::test]
async fn test_receipts_disabled_by_params() {
    let h = TestHarness::new(PolicyParams {
        receive_receipts_enabled: false,
        ..PolicyParams::default()
    });
    h.ingest("quiet");

    let transport = h.transport.clone();
    h.services.flush_operations().await;
    assert!(transport.attempts_for(ExecutorTag::TrackReceived).is_empty());
}

#[tokio::test]
async fn test_running_services_ingest_from_channel() {
    let mut h = TestHarness::new(PolicyParams::default());
    let shutdown = tokio_util::sync::CancellationToken::new();
    let running = h.services.start(shutdown).unwrap();

    assert!(running.payloads.submit(payload("live1")));
    assert!(running.payloads.submit(payload("live2")));
    let outcomes = running.shutdown().await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|o| o.disposition == Disposition::Displayed));
    assert!(h.store.get("live2").unwrap().is_some());
    assert!(h.services.start(tokio_util::sync::CancellationToken::new()).is_err());
}
