//! Collector configuration, with environment overrides for the binary.
//!
//! Environment variables:
//! - COLDWATCH_INSTANCE_ID: Owner id written into the lease (default: collector-<uuid>)
//! - COLDWATCH_DATA_DIR: Directory of the durable store (default: in-memory store)
//! - COLDWATCH_REPLICA_DIR: Directory of the replica store (default: replication disabled)
//! - COLDWATCH_LEASE_TTL_MS: Lease TTL in milliseconds (default: 30000)
//! - COLDWATCH_LEASE_KEY: Lease record key (default: collector-leader)
//! - COLDWATCH_WEBHOOK_URL: Webhook receiving critical notifications (default: log only)
//! - COLDWATCH_NOTIFY_DESTINATION: Label of the notification audience (default: operators)
//! - COLDWATCH_TEMP_LOW / COLDWATCH_TEMP_HIGH: Safe envelope in °C (default: 2.0 / 8.0)

use crate::pipeline::TemperatureRange;
use crate::{CollectorError, CollectorResult};
use coldwatch_leader::LeaseConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub lease: LeaseConfig,
    pub data_dir: Option<PathBuf>,
    pub replica_dir: Option<PathBuf>,
    pub webhook_url: Option<String>,
    pub notify_destination: String,
    pub temperature_range: TemperatureRange,
    /// Bound on every store call issued by the service
    pub store_timeout: Duration,
    /// Bound on one notification send
    pub notify_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            lease: LeaseConfig::default(),
            data_dir: None,
            replica_dir: None,
            webhook_url: None,
            notify_destination: "operators".to_string(),
            temperature_range: TemperatureRange::default(),
            store_timeout: Duration::from_secs(2),
            notify_timeout: Duration::from_secs(5),
        }
    }
}

impl CollectorConfig {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            lease: LeaseConfig::new(instance_id),
            ..Self::default()
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.lease.owner_id
    }

    pub fn with_lease(mut self, lease: LeaseConfig) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_replica_dir(mut self, replica_dir: impl Into<PathBuf>) -> Self {
        self.replica_dir = Some(replica_dir.into());
        self
    }

    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn with_temperature_range(mut self, range: TemperatureRange) -> Self {
        self.temperature_range = range;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Build from the process environment.
    pub fn from_env() -> CollectorResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unparseable numbers fall back to the
    /// default with a warning.
    pub fn from_lookup<F>(lookup: F) -> CollectorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let mut lease = match var("COLDWATCH_INSTANCE_ID") {
            Some(id) => LeaseConfig::new(id.trim()),
            None => defaults.lease.clone(),
        };
        if let Some(key) = var("COLDWATCH_LEASE_KEY") {
            lease = lease.with_lease_key(key.trim());
        }
        if let Some(ttl_ms) = parse_or_warn::<u64>(&var, "COLDWATCH_LEASE_TTL_MS") {
            let ttl = Duration::from_millis(ttl_ms);
            lease = lease.with_ttl(ttl).with_renew_interval(ttl / 3);
        }

        let low = parse_or_warn::<f64>(&var, "COLDWATCH_TEMP_LOW")
            .unwrap_or(defaults.temperature_range.low);
        let high = parse_or_warn::<f64>(&var, "COLDWATCH_TEMP_HIGH")
            .unwrap_or(defaults.temperature_range.high);

        let config = Self {
            lease,
            data_dir: var("COLDWATCH_DATA_DIR").map(PathBuf::from),
            replica_dir: var("COLDWATCH_REPLICA_DIR").map(PathBuf::from),
            webhook_url: var("COLDWATCH_WEBHOOK_URL"),
            notify_destination: var("COLDWATCH_NOTIFY_DESTINATION")
                .unwrap_or(defaults.notify_destination),
            temperature_range: TemperatureRange::new(low, high),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CollectorResult<()> {
        self.lease.validate()?;

        let range = &self.temperature_range;
        if !range.low.is_finite() || !range.high.is_finite() || range.low >= range.high {
            return Err(CollectorError::Config {
                reason: format!("invalid temperature range {}..={}", range.low, range.high),
            });
        }
        if self.store_timeout.is_zero() || self.notify_timeout.is_zero() {
            return Err(CollectorError::Config {
                reason: "timeouts must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_or_warn<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = var(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}
