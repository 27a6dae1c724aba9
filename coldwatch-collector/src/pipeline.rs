//! Reading ingestion: persist, evaluate, raise, hand off.

use crate::dispatcher::{DispatchOutcome, NotificationDispatcher};
use crate::error::bounded;
use crate::{AlertLedger, CollectorResult};
use chrono::{DateTime, Utc};
use coldwatch_core::{
    decode_all, validate_sensor_id, validate_temperature, Alert, AlertType, Condition,
    ConditionalStore, Reading, StoredRecord, READINGS,
};
use coldwatch_leader::LeaderHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Safe storage envelope, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRange {
    pub low: f64,
    pub high: f64,
}

impl Default for TemperatureRange {
    fn default() -> Self {
        Self {
            low: 2.0,
            high: 8.0,
        }
    }
}

impl TemperatureRange {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, temperature: f64) -> bool {
        temperature >= self.low && temperature <= self.high
    }
}

/// Result of one ingest call.
#[derive(Debug)]
pub struct IngestAck {
    pub reading: Reading,
    pub alert: Option<Alert>,
    /// Set when the reading was out of range but the alert could not be
    /// stored. The reading itself is persisted either way.
    pub alert_error: Option<String>,
    /// Background dispatch of the raised alert, if any
    pub dispatch: Option<JoinHandle<DispatchOutcome>>,
}

impl IngestAck {
    pub fn alert_created(&self) -> bool {
        self.alert.is_some()
    }

    pub fn alert_failed(&self) -> bool {
        self.alert_error.is_some()
    }

    /// Wait for the background dispatch. `None` when no alert was raised or
    /// the task did not complete.
    pub async fn dispatch_outcome(self) -> Option<DispatchOutcome> {
        match self.dispatch {
            Some(handle) => handle.await.ok(),
            None => None,
        }
    }
}

pub struct IngestionPipeline {
    store: Arc<dyn ConditionalStore>,
    ledger: AlertLedger,
    dispatcher: Arc<NotificationDispatcher>,
    leader: LeaderHandle,
    range: TemperatureRange,
    store_timeout: Duration,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn ConditionalStore>,
        ledger: AlertLedger,
        dispatcher: Arc<NotificationDispatcher>,
        leader: LeaderHandle,
    ) -> Self {
        Self {
            store,
            ledger,
            dispatcher,
            leader,
            range: TemperatureRange::default(),
            store_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_range(mut self, range: TemperatureRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn range(&self) -> TemperatureRange {
        self.range
    }

    /// Persist a reading and raise a critical alert when it leaves the safe
    /// range. Delivery runs on a spawned task; the caller never waits on it.
    pub async fn ingest(
        &self,
        sensor_id: &str,
        temperature: f64,
        taken_at: DateTime<Utc>,
    ) -> CollectorResult<IngestAck> {
        validate_sensor_id(sensor_id)?;
        validate_temperature(temperature)?;

        let mut reading = Reading::new(sensor_id, temperature, taken_at);
        let document = reading.to_document()?;
        reading.id = bounded(self.store_timeout, "store reading", async {
            self.store.insert(READINGS, document).await
        })
        .await?;

        debug!(reading_id = %reading.id, sensor_id, temperature, "Reading stored");

        if self.range.contains(temperature) {
            return Ok(IngestAck {
                reading,
                alert: None,
                alert_error: None,
                dispatch: None,
            });
        }

        let message = format!(
            "Temperature {:.1}°C outside safe range {:.1}°C to {:.1}°C",
            temperature, self.range.low, self.range.high
        );
        // The reading is already stored; an error here must not invite a
        // retry that would store it twice
        let alert = match self
            .ledger
            .raise(sensor_id, temperature, AlertType::CriticalTemperature, message)
            .await
        {
            Ok(alert) => alert,
            Err(e) => {
                error!(
                    reading_id = %reading.id,
                    sensor_id,
                    temperature,
                    error = %e,
                    "Failed to raise alert for out-of-range reading"
                );
                return Ok(IngestAck {
                    reading,
                    alert: None,
                    alert_error: Some(e.to_string()),
                    dispatch: None,
                });
            }
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        let leader = self.leader.clone();
        let to_dispatch = alert.clone();
        let dispatch = tokio::spawn(async move {
            dispatcher
                .dispatch_if_critical(&to_dispatch, || leader.is_leader())
                .await
        });

        Ok(IngestAck {
            reading,
            alert: Some(alert),
            alert_error: None,
            dispatch: Some(dispatch),
        })
    }

    pub async fn latest_reading(&self) -> CollectorResult<Option<Reading>> {
        Ok(self.list_readings(1).await?.into_iter().next())
    }

    /// Readings newest first by storage time.
    pub async fn list_readings(&self, limit: usize) -> CollectorResult<Vec<Reading>> {
        let documents = bounded(self.store_timeout, "scan readings", async {
            self.store.scan(READINGS, &Condition::Always, None).await
        })
        .await?;

        let (mut readings, skipped) = decode_all::<Reading>(documents);
        if skipped > 0 {
            warn!(skipped, "Skipped undecodable reading documents");
        }
        readings.sort_by(|a, b| b.stored_at.cmp(&a.stored_at));
        readings.truncate(limit);
        Ok(readings)
    }

    pub async fn count_readings(&self) -> CollectorResult<usize> {
        bounded(self.store_timeout, "count readings", async {
            self.store.count(READINGS, &Condition::Always).await
        })
        .await
    }
}
