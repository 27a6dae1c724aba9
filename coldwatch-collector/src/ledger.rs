//! Alert lifecycle: raise, resolve and query.

use crate::error::bounded;
use crate::CollectorResult;
use chrono::Utc;
use coldwatch_core::{
    decode_all, validate_sensor_id, validate_temperature, Alert, AlertType, Condition,
    ConditionalStore, FieldUpdate, Severity, StoredRecord, ALERTS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Alert tallies for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCounts {
    pub total: usize,
    pub open: usize,
    pub by_severity: BTreeMap<Severity, usize>,
}

/// Owns alert records in the store. Alerts are never deleted; a resolved
/// alert never changes again.
#[derive(Clone)]
pub struct AlertLedger {
    store: Arc<dyn ConditionalStore>,
    store_timeout: Duration,
}

impl AlertLedger {
    pub fn new(store: Arc<dyn ConditionalStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Record a new alert. Every call creates a distinct record.
    pub async fn raise(
        &self,
        sensor_id: &str,
        temperature: f64,
        alert_type: AlertType,
        message: impl Into<String>,
    ) -> CollectorResult<Alert> {
        validate_sensor_id(sensor_id)?;
        validate_temperature(temperature)?;

        let mut alert = Alert::new(sensor_id, temperature, alert_type, message);
        let document = alert.to_document()?;
        alert.id = bounded(self.store_timeout, "raise alert", async {
            self.store.insert(ALERTS, document).await
        })
        .await?;

        info!(
            alert_id = %alert.id,
            sensor_id = %alert.sensor_id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            "Alert raised"
        );
        Ok(alert)
    }

    /// Mark an alert resolved.
    ///
    /// Returns `true` when the alert exists; the first call stamps
    /// `resolved_at` and later calls leave it untouched. Returns `false` for
    /// an unknown id.
    pub async fn resolve(&self, alert_id: &str) -> CollectorResult<bool> {
        if alert_id.trim().is_empty() {
            return Ok(false);
        }

        let updates = [
            FieldUpdate::set(Alert::RESOLVED_FIELD, true),
            FieldUpdate::set(Alert::RESOLVED_AT_FIELD, Utc::now().to_rfc3339()),
        ];
        let outcome = bounded(self.store_timeout, "resolve alert", async {
            self.store
                .update_if_matches(
                    ALERTS,
                    alert_id,
                    &updates,
                    Condition::not_true(Alert::RESOLVED_FIELD),
                )
                .await
        })
        .await?;

        if outcome.is_applied() {
            info!(alert_id, "Alert resolved");
            return Ok(true);
        }

        // Either already resolved or never existed
        let exists = self.get(alert_id).await?.is_some();
        debug!(alert_id, exists, "Resolve was a no-op");
        Ok(exists)
    }

    pub async fn get(&self, alert_id: &str) -> CollectorResult<Option<Alert>> {
        let document = bounded(self.store_timeout, "get alert", async {
            self.store.get(ALERTS, alert_id).await
        })
        .await?;

        Ok(document.map(Alert::from_document).transpose()?)
    }

    /// Alerts newest first, at most `limit` of them.
    pub async fn list(&self, limit: usize) -> CollectorResult<Vec<Alert>> {
        let mut alerts = self.all().await?;
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts.truncate(limit);
        Ok(alerts)
    }

    pub async fn latest(&self) -> CollectorResult<Option<Alert>> {
        Ok(self.list(1).await?.into_iter().next())
    }

    pub async fn counts(&self) -> CollectorResult<AlertCounts> {
        let alerts = self.all().await?;

        let mut counts = AlertCounts {
            total: alerts.len(),
            ..AlertCounts::default()
        };
        for alert in &alerts {
            if alert.is_open() {
                counts.open += 1;
            }
            *counts.by_severity.entry(alert.severity).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn all(&self) -> CollectorResult<Vec<Alert>> {
        let documents = bounded(self.store_timeout, "scan alerts", async {
            self.store.scan(ALERTS, &Condition::Always, None).await
        })
        .await?;

        let (alerts, skipped) = decode_all::<Alert>(documents);
        if skipped > 0 {
            warn!(skipped, "Skipped undecodable alert documents");
        }
        Ok(alerts)
    }
}
