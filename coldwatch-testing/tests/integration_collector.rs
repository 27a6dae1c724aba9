//! Collector integration tests
//!
//! Ingestion, alert lifecycle, exactly-once notification and replication
//! checks across several collector instances.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use proptest::prelude::*;

use coldwatch_collector::{CollectorConfig, CollectorService, DispatchOutcome, LogChannel};
use coldwatch_core::{
    classify_severity, AlertType, Condition, ConditionalStore, Reading, ReplicationStatus,
    Severity, StoredRecord, ALERTS, READINGS,
};
use coldwatch_store::InMemoryStore;
use coldwatch_testing::{init_test_logging, CollectorCluster};

/// Scenario A: an out-of-range reading on the leader is stored, raises a
/// critical alert and produces exactly one notification
#[tokio::test]
async fn test_out_of_range_reading_on_leader() {
    init_test_logging();

    let cluster = CollectorCluster::new(2).expect("Failed to build cluster");
    cluster.tick_all().await;
    assert_eq!(cluster.leaders(), vec![0]);

    let ack = cluster
        .instance(0)
        .ingest("lab-1", 15.5, Utc::now())
        .await
        .expect("ingest failed");
    assert!(ack.alert_created());

    let alert = ack.alert.clone().expect("alert returned");
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(ack.dispatch_outcome().await, Some(DispatchOutcome::Sent));

    assert_eq!(cluster.store().count(READINGS, &Condition::Always).await.unwrap(), 1);
    assert_eq!(cluster.channel().count_for(&alert.id), 1);

    let message = &cluster.channel().messages()[0];
    assert_eq!(message.subject, "Coldwatch - CRITICAL_TEMPERATURE - CRITICAL");
    assert!(message.body.contains("Sensor: lab-1"));
}

/// Scenario A on a follower: alert stored, nothing sent
#[tokio::test]
async fn test_out_of_range_reading_on_follower() {
    init_test_logging();

    let cluster = CollectorCluster::new(2).expect("Failed to build cluster");
    cluster.tick_all().await;

    let ack = cluster
        .instance(1)
        .ingest("lab-1", 15.5, Utc::now())
        .await
        .expect("ingest failed");
    assert!(ack.alert_created());
    assert_eq!(ack.dispatch_outcome().await, Some(DispatchOutcome::NotLeader));
    assert_eq!(cluster.channel().count(), 0);

    let alerts = cluster.instance(0).list_alerts(10).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(!alerts[0].notified);
}

/// Scenario B: an in-range reading is stored and raises nothing
#[tokio::test]
async fn test_in_range_reading() {
    init_test_logging();

    let cluster = CollectorCluster::new(1).expect("Failed to build cluster");
    cluster.tick_all().await;

    let ack = cluster
        .instance(0)
        .ingest("lab-1", 5.0, Utc::now())
        .await
        .expect("ingest failed");
    assert!(!ack.alert_created());
    assert!(ack.dispatch.is_none());

    assert_eq!(cluster.instance(0).count_readings().await.unwrap(), 1);
    assert_eq!(cluster.store().count(ALERTS, &Condition::Always).await.unwrap(), 0);
    assert_eq!(
        cluster.instance(0).latest_reading().await.unwrap().unwrap().sensor_id,
        "lab-1"
    );
}

/// Every instance racing on the same alert: one mark, one send
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_once_mark_across_instances() {
    init_test_logging();

    let cluster = CollectorCluster::new(6).expect("Failed to build cluster");
    let alert = cluster
        .instance(0)
        .ledger()
        .raise("lab-1", 11.0, AlertType::CriticalTemperature, "warm")
        .await
        .unwrap();

    let marks = cluster
        .instances()
        .iter()
        .map(|instance| {
            let dispatcher = instance.dispatcher();
            let id = alert.id.clone();
            tokio::spawn(async move { dispatcher.try_mark_notified(&id).await.unwrap() })
        })
        .collect::<Vec<_>>();
    let wins = join_all(marks)
        .await
        .into_iter()
        .filter(|joined| matches!(joined, Ok(true)))
        .count();
    assert_eq!(wins, 1);
}

/// Stale leadership beliefs on several instances still yield one send
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redundant_dispatch_is_neutralized() {
    init_test_logging();

    let cluster = CollectorCluster::new(4).expect("Failed to build cluster");
    let alert = cluster
        .instance(0)
        .ledger()
        .raise("lab-1", 0.5, AlertType::CriticalTemperature, "cold")
        .await
        .unwrap();

    // Every instance believes it leads
    let dispatches = cluster
        .instances()
        .iter()
        .map(|instance| {
            let dispatcher = instance.dispatcher();
            let alert = alert.clone();
            tokio::spawn(async move { dispatcher.dispatch_if_critical(&alert, || true).await })
        })
        .collect::<Vec<_>>();
    let outcomes: Vec<DispatchOutcome> = join_all(dispatches)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| **o == DispatchOutcome::Sent).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == DispatchOutcome::AlreadyNotified)
            .count(),
        3
    );
    assert_eq!(cluster.channel().count_for(&alert.id), 1);
}

/// A failed send is not retried and the alert stays notified
#[tokio::test]
async fn test_failed_send_is_accepted_loss() {
    init_test_logging();

    let cluster = CollectorCluster::new(2).expect("Failed to build cluster");
    cluster.tick_all().await;
    cluster.channel().set_failing(true);

    let ack = cluster.instance(0).ingest("lab-1", 20.0, Utc::now()).await.unwrap();
    let alert_id = ack.alert.as_ref().unwrap().id.clone();
    assert_eq!(ack.dispatch_outcome().await, Some(DispatchOutcome::SendFailed));

    cluster.channel().set_failing(false);
    let alert = cluster.instance(1).get_alert(&alert_id).await.unwrap().unwrap();
    assert!(alert.notified);
    assert_eq!(
        cluster
            .instance(0)
            .dispatcher()
            .dispatch_if_critical(&alert, || true)
            .await,
        DispatchOutcome::AlreadyNotified
    );
    assert_eq!(cluster.channel().count_for(&alert_id), 1);
}

/// Resolve is idempotent from any instance and unknown ids report false
#[tokio::test]
async fn test_resolve_from_any_instance() {
    init_test_logging();

    let cluster = CollectorCluster::new(2).expect("Failed to build cluster");
    let ack = cluster.instance(0).ingest("lab-1", 9.5, Utc::now()).await.unwrap();
    let alert_id = ack.alert.as_ref().unwrap().id.clone();

    assert!(cluster.instance(1).resolve_alert(&alert_id).await.unwrap());
    let first = cluster.instance(0).get_alert(&alert_id).await.unwrap().unwrap();

    assert!(cluster.instance(0).resolve_alert(&alert_id).await.unwrap());
    let second = cluster.instance(1).get_alert(&alert_id).await.unwrap().unwrap();
    assert_eq!(first.resolved_at, second.resolved_at);

    assert!(!cluster.instance(0).resolve_alert("no-such-alert").await.unwrap());

    // A resolved alert can no longer be claimed for notification
    assert!(!cluster
        .instance(0)
        .dispatcher()
        .try_mark_notified(&alert_id)
        .await
        .unwrap());
}

/// Scenario C: 100 primary readings against 98 replicated ones
#[tokio::test]
async fn test_replica_lagging() {
    init_test_logging();

    let primary = InMemoryStore::new();
    let replica = InMemoryStore::new();
    for i in 0..100 {
        let reading = Reading::new("lab-1", 4.0, Utc::now()).to_document().unwrap();
        primary.insert(READINGS, reading.clone()).await.unwrap();
        if i < 98 {
            replica.insert(READINGS, reading).await.unwrap();
        }
    }

    let service = CollectorService::new(
        CollectorConfig::new("collector-0"),
        Arc::new(primary),
        Arc::new(LogChannel),
    )
    .unwrap()
    .with_replica(Arc::new(replica));

    let snapshot = service.replication_status(READINGS).await.unwrap();
    assert_eq!(snapshot.status, ReplicationStatus::Lagging);
    assert_eq!(snapshot.status.to_string(), "lagging");
    assert_eq!(snapshot.primary_count, 100);
    assert_eq!(snapshot.replica_count, Some(98));
    assert!(snapshot.last_replica_write_at.is_some());
}

/// An unreachable replica reports "not enabled" instead of failing
#[tokio::test]
async fn test_replica_unreachable() {
    init_test_logging();

    let replica = coldwatch_testing::FaultyStore::new(Arc::new(InMemoryStore::new()));
    replica.inject(coldwatch_testing::FaultType::Outage);

    let service = CollectorService::new(
        CollectorConfig::new("collector-0"),
        Arc::new(InMemoryStore::new()),
        Arc::new(LogChannel),
    )
    .unwrap()
    .with_replica(Arc::new(replica));

    let snapshot = service.replication_status(ALERTS).await.unwrap();
    assert_eq!(snapshot.status, ReplicationStatus::NotEnabled);
    assert_eq!(snapshot.replica_count, None);
}

/// Store outage on the ingest path surfaces as a retryable error
#[tokio::test]
async fn test_ingest_during_outage() {
    init_test_logging();

    let cluster = CollectorCluster::new(1).expect("Failed to build cluster");
    cluster.link(0).inject(coldwatch_testing::FaultType::Outage);

    let err = cluster
        .instance(0)
        .ingest("lab-1", 4.0, Utc::now())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(!cluster.instance(0).health().await.is_healthy());

    cluster.link(0).heal();
    assert!(cluster.instance(0).health().await.is_healthy());
}

/// Concurrent ingestion across instances produces one alert and one
/// notification per out-of-range reading
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingestion() {
    init_test_logging();

    let cluster = Arc::new(CollectorCluster::new(3).expect("Failed to build cluster"));
    cluster.tick_all().await;

    let calls = (0..30)
        .map(|i| {
            let cluster = Arc::clone(&cluster);
            tokio::spawn(async move {
                let temperature = if i % 3 == 0 { 12.0 } else { 5.0 };
                let ack = cluster
                    .instance(i % 3)
                    .ingest(&format!("lab-{}", i), temperature, Utc::now())
                    .await
                    .unwrap();
                ack.dispatch_outcome().await
            })
        })
        .collect::<Vec<_>>();
    join_all(calls).await;

    let counts = cluster.instance(1).alert_counts().await.unwrap();
    assert_eq!(counts.total, 10);
    assert_eq!(cluster.instance(2).count_readings().await.unwrap(), 30);
    // Only instance 0 leads, and it ingested every out-of-range reading
    assert_eq!(cluster.channel().count(), 10);
}

/// Tick the cluster for a while with running loops and resolve/ingest
/// traffic; the held lease is always owned by the single believed leader
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_leader_status_matches_lease() {
    init_test_logging();

    let cluster = CollectorCluster::new(3).expect("Failed to build cluster");
    cluster.start_all().await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(2))
        .await
        .expect("leader elected");

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let holder = cluster.instance(2).lease_holder().await.unwrap().unwrap();
        assert_eq!(holder.owner_id, format!("collector-{}", leader));
        assert_eq!(cluster.leaders(), vec![leader]);
        assert_eq!(
            cluster.instance(leader).current_leader_status().owner_id,
            holder.owner_id
        );
    }

    cluster.stop_all().await;
}

proptest! {
    #[test]
    fn prop_only_critical_temperature_is_critical(index in 0usize..4) {
        let alert_type = AlertType::ALL[index];
        let severity = classify_severity(alert_type);
        prop_assert_eq!(severity == Severity::Critical, alert_type == AlertType::CriticalTemperature);
        prop_assert_eq!(severity == Severity::High, alert_type == AlertType::SensorOffline);
    }
}
