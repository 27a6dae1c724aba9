use crate::{CoreError, Result};

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub max_sensor_id_len: usize,
    pub max_key_len: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_sensor_id_len: 128,
            max_key_len: 256,
        }
    }
}

pub fn validate_sensor_id(sensor_id: &str) -> Result<()> {
    let config = ValidationConfig::default();

    if sensor_id.trim().is_empty() {
        return Err(CoreError::validation("sensor id cannot be empty"));
    }
    if sensor_id.len() > config.max_sensor_id_len {
        return Err(CoreError::validation(format!(
            "sensor id longer than {} bytes",
            config.max_sensor_id_len
        )));
    }
    Ok(())
}

/// Any finite value is a reading; how far it strays is for the alert
/// thresholds to judge.
pub fn validate_temperature(temperature: f64) -> Result<()> {
    if !temperature.is_finite() {
        return Err(CoreError::validation(format!(
            "temperature {} is not a finite number",
            temperature
        )));
    }
    Ok(())
}

/// Keys and collection names share the same shape rules.
pub fn validate_key(key: &str) -> Result<()> {
    let config = ValidationConfig::default();

    if key.is_empty() {
        return Err(CoreError::InvalidKey("Key cannot be empty".to_string()));
    }
    if key.len() > config.max_key_len {
        return Err(CoreError::InvalidKey("Key too long".to_string()));
    }
    Ok(())
}
