//! Demo: three collectors sharing one store.
//!
//! This demo shows how to:
//! - Run several collectors whose lease loops elect a single leader
//! - Watch leadership changes on the notification bus
//! - Ingest readings from every instance while only the leader notifies
//! - Fail over by stopping the leader and waiting one TTL

use chrono::Utc;
use coldwatch_collector::{CollectorConfig, CollectorService, DispatchOutcome, LogChannel};
use coldwatch_core::READINGS;
use coldwatch_leader::{LeadershipChange, LeaseConfig, NotificationFilter};
use coldwatch_store::InMemoryStore;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting multi-collector demo");
    run_demo().await?;
    Ok(())
}

async fn run_demo() -> Result<(), Box<dyn std::error::Error>> {
    let store = InMemoryStore::new();
    let collectors = start_collectors(&store, 3).await?;

    let leader = wait_for_leader(&collectors).await.ok_or("no leader elected")?;
    info!("collector-{} leads", leader);

    ingest_readings(&collectors).await?;
    print_summary(&collectors[0]).await?;

    info!("Stopping collector-{} to force a failover", leader);
    collectors[leader].stop().await;
    sleep(Duration::from_secs(3)).await;

    match wait_for_leader(&collectors).await {
        Some(successor) => info!("collector-{} took over", successor),
        None => warn!("No successor yet"),
    }

    for collector in &collectors {
        collector.stop().await;
    }
    info!("Demo finished");
    Ok(())
}

async fn start_collectors(
    store: &InMemoryStore,
    count: usize,
) -> Result<Vec<CollectorService>, Box<dyn std::error::Error>> {
    let mut collectors = Vec::with_capacity(count);

    for i in 0..count {
        let owner = format!("collector-{}", i);
        let lease = LeaseConfig::new(owner.as_str())
            .with_ttl(Duration::from_secs(2))
            .with_renew_interval(Duration::from_millis(500))
            .with_acquire_interval(Duration::from_millis(500))
            .with_initial_jitter(Duration::from_millis(300));
        let service = CollectorService::new(
            CollectorConfig::new(owner.as_str()).with_lease(lease),
            Arc::new(store.clone()),
            Arc::new(LogChannel),
        )?;

        spawn_change_logger(&service, owner).await;
        service.start().await;
        collectors.push(service);
    }

    Ok(collectors)
}

async fn spawn_change_logger(service: &CollectorService, owner: String) {
    let bus = service.coordinator().notification_bus();
    let (_id, mut changes) = bus.subscribe(NotificationFilter::Transitions).await;

    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            match change {
                LeadershipChange::Acquired { expires_at, .. } => {
                    info!("[{}] acquired the lease until {}", owner, expires_at)
                }
                LeadershipChange::Lost { reason, .. } => {
                    warn!("[{}] lost leadership: {}", owner, reason)
                }
                LeadershipChange::Renewed { .. } => {}
            }
        }
    });
}

async fn wait_for_leader(collectors: &[CollectorService]) -> Option<usize> {
    for _ in 0..50 {
        if let Some(index) = collectors
            .iter()
            .position(|c| c.current_leader_status().is_leader)
        {
            return Some(index);
        }
        sleep(Duration::from_millis(100)).await;
    }
    None
}

async fn ingest_readings(collectors: &[CollectorService]) -> Result<(), Box<dyn std::error::Error>> {
    let mut sent = 0;

    for round in 0..12 {
        let collector = &collectors[round % collectors.len()];
        let temperature = {
            let mut rng = rand::thread_rng();
            if round % 4 == 0 {
                rng.gen_range(8.5..14.0)
            } else {
                rng.gen_range(2.5..7.5)
            }
        };

        let ack = collector
            .ingest(&format!("fridge-{}", round % 4), temperature, Utc::now())
            .await?;
        if let Some(DispatchOutcome::Sent) = ack.dispatch_outcome().await {
            sent += 1;
        }
    }

    info!("{} critical notifications sent", sent);
    Ok(())
}

async fn print_summary(collector: &CollectorService) -> Result<(), Box<dyn std::error::Error>> {
    let counts = collector.alert_counts().await?;
    let readings = collector.count_readings().await?;
    let replication = collector.replication_status(READINGS).await?;

    info!(
        "readings={} alerts={} open={} replication={}",
        readings, counts.total, counts.open, replication.status
    );

    for alert in collector.list_alerts(5).await? {
        info!(
            "  {} {} {:.1}°C notified={}",
            alert.id, alert.alert_type, alert.temperature, alert.notified
        );
    }
    Ok(())
}
