/*
    End-to-End Integration Test - Replica across a reliable link

    Host collection → DeltaPublisher → link (JSON frames) → Reconciler, with
    the link configured to deliver everything in order. Covers:
    - Initial state taken from the authoritative snapshot
    - Full-state notifications on the remote side
    - Retention of every reference handed across
    - Teardown through the link
*/

use replica_core::core_boundary::{spawn_link, LinkConfig, LinkHandle, RetentionTable};
use replica_core::core_sync::{DeltaPublisher, DeltaSource, ObservableMap, ObservableSource, Reconciler, ReconcilerConfig};
use replica_core::test_utils::*;
use std::sync::Arc;
use tokio::sync::mpsc;

struct Harness {
    host: Arc<ObservableMap<String, Todo>>,
    publisher: Arc<DeltaPublisher<String, Todo>>,
    link: Arc<LinkHandle<String, Todo>>,
    host_retention: Arc<RetentionTable>,
    remote_retention: Arc<RetentionTable>,
}

impl Harness {
    fn new(initial: &[(&str, &str)]) -> Self {
        let host = Arc::new(ObservableMap::new(todos(initial)));
        let host_retention = Arc::new(RetentionTable::new());
        let publisher = Arc::new(DeltaPublisher::new(host.clone(), host_retention.clone()));
        let link: Arc<LinkHandle<String, Todo>> = Arc::new(spawn_link(publisher.clone(), &LinkConfig::default()));
        Harness { host, publisher, link, host_retention, remote_retention: Arc::new(RetentionTable::new()) }
    }

    async fn replica(&self) -> Reconciler<String, Todo> {
        Reconciler::create(self.link.clone(), self.remote_retention.clone(), ReconcilerConfig::default())
            .await
            .expect("replica over link")
    }
}

/// **Scenario: replica created after the host already changed**
///
/// 1. Publisher starts over [("1", hello)]
/// 2. Host switches to [("2", hello)] before any replica exists
/// 3. A replica created across the link starts from [("2", hello)]
#[tokio::test]
async fn test_initial_state_over_link() {
    let harness = Harness::new(&[("1", "hello")]);
    harness.host.set(todos(&[("2", "hello")]));

    let replica = harness.replica().await;

    assert_eq!(replica.current(), todos(&[("2", "hello")]));
    assert_eq!(replica.version(), 2);
}

/// **Scenario: remote subscribers see the whole collection**
#[tokio::test]
async fn test_full_state_notification_over_link() {
    let harness = Harness::new(&[("1", "First"), ("2", "Second")]);
    let replica = harness.replica().await;
    let (tx, mut states) = mpsc::unbounded_channel();
    let _subscription = replica.subscribe(move |current| {
        let _ = tx.send(current.clone());
    });

    harness.host.set(todos(&[("1", "First"), ("3", "Third")]));

    let state = recv_timeout(&mut states, DEFAULT_TEST_TIMEOUT).await.unwrap();
    assert_eq!(state, todos(&[("1", "First"), ("3", "Third")]));
    assert_eq!(replica.version(), 2);
    assert_eq!(replica.stats().resyncs, 0);
}

/// **Scenario: every mutation arrives, no resync needed**
#[tokio::test]
async fn test_reliable_link_round_trip() {
    let harness = Harness::new(&[]);
    let replica = harness.replica().await;

    let mut rng = test_rng();
    for _ in 0..100 {
        random_mutation(&mut rng, &harness.host, 10);
    }

    let target = harness.publisher.version();
    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || replica.version() == target).await);
    assert_eq!(replica.current(), harness.host.current());
    assert_eq!(replica.stats().resyncs, 0);
    assert_eq!(harness.link.fault_stats().dropped, 0);
}

/// **Scenario: destroy releases references on both sides**
#[tokio::test]
async fn test_destroy_releases_everything() {
    let harness = Harness::new(&[("1", "x")]);
    let replica = harness.replica().await;

    assert_eq!(harness.remote_retention.hold_count(harness.link.ref_id()), 1);
    assert_eq!(harness.host_retention.len(), 1);
    assert_eq!(harness.publisher.subscriber_count(), 1);

    replica.destroy().await.unwrap();

    assert!(harness.remote_retention.is_empty());
    assert!(harness.host_retention.is_empty());
    assert_eq!(harness.publisher.subscriber_count(), 0);
    assert_eq!(harness.link.registered_callbacks(), 0);

    harness.host.insert("2".to_string(), todo("after destroy"));
    settle().await;
    assert_eq!(replica.current(), todos(&[("1", "x")]));
}

/// **Scenario: the link goes away under a live replica**
#[tokio::test]
async fn test_link_shutdown_then_destroy() {
    let harness = Harness::new(&[("1", "x")]);
    let replica = harness.replica().await;

    harness.link.shutdown().await.unwrap();
    assert_eq!(harness.publisher.subscriber_count(), 0);
    assert!(harness.host_retention.is_empty());

    assert!(replica.resync().await.is_err());
    replica.destroy().await.unwrap();
    assert!(harness.remote_retention.is_empty());
}
