//! Outbound notification channels.

use crate::NotifyError;
use async_trait::async_trait;
use coldwatch_core::Alert;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Rendered notification for one alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub alert_id: String,
    pub destination: String,
    pub subject: String,
    pub body: String,
}

impl NotificationMessage {
    pub fn for_alert(alert: &Alert, destination: impl Into<String>) -> Self {
        let subject = format!("Coldwatch - {} - {}", alert.alert_type, alert.severity);
        let body = format!(
            "COLDWATCH ALERT\n\n\
             Type: {}\n\
             Sensor: {}\n\
             Temperature: {}°C\n\
             Severity: {}\n\
             Message: {}\n\
             Time: {}\n\n\
             Action required: check the refrigerator immediately!",
            alert.alert_type,
            alert.sensor_id,
            alert.temperature,
            alert.severity,
            alert.message,
            alert.created_at.to_rfc3339(),
        );

        Self {
            alert_id: alert.id.clone(),
            destination: destination.into(),
            subject,
            body,
        }
    }
}

/// Somewhere a notification can be delivered. One call, no retry.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Always succeeds.
#[derive(Debug, Default, Clone)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        tracing::warn!(
            alert_id = %message.alert_id,
            destination = %message.destination,
            subject = %message.subject,
            "Critical notification: {}",
            message.body
        );
        Ok(())
    }
}

/// POSTs the message as JSON to a webhook.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    timeout: Duration,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            headers: HashMap::new(),
            timeout,
        })
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "alert_id": message.alert_id,
            "destination": message.destination,
            "subject": message.subject,
            "message": message.body,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut request = self.client.post(&self.url).json(&payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                NotifyError::Timeout(self.timeout)
            } else {
                NotifyError::Webhook(format!("Failed to send webhook: {}", e))
            }
        })?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }

        tracing::debug!(
            alert_id = %message.alert_id,
            url = %self.url,
            "Webhook notification sent"
        );
        Ok(())
    }
}

/// Delivers to every inner channel; fails if any of them failed.
#[derive(Clone, Default)]
pub struct FanOutChannel {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl FanOutChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl NotificationChannel for FanOutChannel {
    fn name(&self) -> &str {
        "fan-out"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let mut errors = Vec::new();

        for channel in &self.channels {
            if let Err(e) = channel.send(message).await {
                tracing::warn!(channel = channel.name(), error = %e, "Channel delivery failed");
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Multiple(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coldwatch_core::AlertType;

    struct Failing;

    #[async_trait]
    impl NotificationChannel for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn send(&self, _message: &NotificationMessage) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("down".into()))
        }
    }

    fn message() -> NotificationMessage {
        let mut alert = Alert::new("fridge-7", 9.25, AlertType::CriticalTemperature, "too warm");
        alert.id = "alert-1".to_string();
        NotificationMessage::for_alert(&alert, "operators")
    }

    #[test]
    fn test_message_format() {
        let message = message();
        assert_eq!(message.subject, "Coldwatch - CRITICAL_TEMPERATURE - CRITICAL");
        assert!(message.body.contains("Sensor: fridge-7"));
        assert!(message.body.contains("Temperature: 9.25°C"));
        assert!(message.body.contains("Message: too warm"));
        assert!(message.body.ends_with("check the refrigerator immediately!"));
        assert_eq!(message.alert_id, "alert-1");
    }

    #[tokio::test]
    async fn test_log_channel_succeeds() {
        assert!(LogChannel.send(&message()).await.is_ok());
    }

    #[tokio::test]
    async fn test_fan_out_collects_failures() {
        let channel = FanOutChannel::new()
            .with_channel(Arc::new(LogChannel))
            .with_channel(Arc::new(Failing))
            .with_channel(Arc::new(Failing));
        assert_eq!(channel.len(), 3);

        match channel.send(&message()).await {
            Err(NotifyError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected result: {:?}", other),
        }

        let healthy = FanOutChannel::new().with_channel(Arc::new(LogChannel));
        assert!(healthy.send(&message()).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_an_error() {
        // Port 9 (discard) on localhost is not listening for HTTP
        let channel = WebhookChannel::new("http://127.0.0.1:9/hook", Duration::from_millis(500))
            .unwrap()
            .with_header("x-coldwatch", "test");
        assert_eq!(channel.url(), "http://127.0.0.1:9/hook");
        assert!(channel.send(&message()).await.is_err());
    }
}
