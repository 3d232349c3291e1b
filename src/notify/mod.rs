//! Outbound webhook notifications
//!
//! Best-effort delivery of deployment outcomes to a configured webhook.
//! Failures are retried with backoff and then logged; they never fail the
//! job that triggered them.

use crate::config::NotificationConfig;
use crate::error::{AgentError, Result};
use crate::resilience::{with_retry_if, RetryConfig};
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Notification event names on the wire
pub const EVENT_DEPLOYED: &str = "agent.deployed";
pub const EVENT_DEPLOYMENT_FAILED: &str = "agent.deployment.failed";

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event: &'a str,
    data: &'a Value,
    timestamp: String,
    source: &'a str,
}

/// Webhook notification client
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
    source: String,
    retry: RetryConfig,
}

impl WebhookNotifier {
    /// Returns None when no webhook URL is configured
    pub fn from_config(config: &NotificationConfig) -> Option<Arc<Self>> {
        config.webhook_url.as_ref().map(|url| {
            info!("webhook notifications enabled");
            Arc::new(Self {
                client: Client::new(),
                webhook_url: url.clone(),
                source: config.source.clone(),
                retry: RetryConfig {
                    max_attempts: config.max_retries.max(1),
                    initial_delay_ms: 500,
                    ..RetryConfig::default()
                },
            })
        })
    }

    #[cfg(test)]
    pub fn new(webhook_url: String, source: String) -> Arc<Self> {
        Arc::new(Self {
            client: Client::new(),
            webhook_url,
            source,
            retry: RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
        })
    }

    /// Deliver an event, retrying transient failures.
    ///
    /// Callers treat the result as advisory; a lost notification never fails
    /// the deployment it reports on.
    pub async fn send(&self, event: &str, data: &Value) -> Result<()> {
        let result = with_retry_if(
            "webhook",
            &self.retry,
            || self.post_once(event, data),
            // Any delivery failure is worth another attempt
            |_| true,
        )
        .await;

        match &result {
            Ok(()) => debug!("webhook '{event}' delivered"),
            Err(e) => warn!("webhook '{event}' delivery failed: {e}"),
        }
        result
    }

    async fn post_once(&self, event: &str, data: &Value) -> Result<()> {
        let payload = WebhookPayload {
            event,
            data,
            timestamp: Utc::now().to_rfc3339(),
            source: &self.source,
        };

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(AgentError::Service {
                endpoint: self.webhook_url.clone(),
                status: status.as_u16(),
                message: body,
            })
        }
    }
}
