//! Quick-deploy registration client
//!
//! Validates the outbound payload before any I/O, then sends it through the
//! full guard stack: rate limiter slot → circuit breaker → bounded retry.
//! The backend must be called exactly once per logical deployment; callers
//! only reach this after all on-chain steps have succeeded.

use crate::backend::RegistrationClient;
use crate::config::BackendConfig;
use crate::error::{AgentError, Result};
use crate::resilience::{with_retry, CircuitBreaker, RateLimiter, RetryConfig};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

static AGENT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,64}$").expect("valid regex"));
static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid regex"));
static TX_HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("valid regex"));

/// Registration payload for `POST /quick-deploy`.
///
/// Field names follow the backend's JSON contract exactly.
#[derive(Debug, Clone, Serialize)]
pub struct QuickDeployRequest {
    #[serde(rename = "agentName")]
    pub agent_name: String,
    #[serde(rename = "contractCreationTxnHash")]
    pub contract_creation_txn_hash: String,
    pub creating_user_wallet_address: String,
    #[serde(rename = "paymentTxnHash")]
    pub payment_txn_hash: String,
    #[serde(rename = "deploySource")]
    pub deploy_source: String,
    #[serde(rename = "referralCode", skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_token_fund: Option<bool>,
}

impl QuickDeployRequest {
    /// Reject malformed payloads before any network call
    pub fn validate(&self) -> Result<()> {
        if !AGENT_NAME_RE.is_match(&self.agent_name) {
            return Err(AgentError::validation(
                "agentName",
                "must match [A-Za-z0-9_-]{3,64}",
            ));
        }
        if !ADDRESS_RE.is_match(&self.creating_user_wallet_address) {
            return Err(AgentError::validation(
                "creating_user_wallet_address",
                "must be a 0x-prefixed 40-hex-digit address",
            ));
        }
        for (field, hash) in [
            ("contractCreationTxnHash", &self.contract_creation_txn_hash),
            ("paymentTxnHash", &self.payment_txn_hash),
        ] {
            if !TX_HASH_RE.is_match(hash) {
                return Err(AgentError::validation(
                    field,
                    "must be a 0x-prefixed 64-hex-digit transaction hash",
                ));
            }
        }
        if self.deploy_source.trim().is_empty() {
            return Err(AgentError::validation("deploySource", "must not be empty"));
        }
        Ok(())
    }
}

/// Client for the external registration backend
pub struct QuickDeployClient {
    client: Client,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
}

impl QuickDeployClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retry: RetryConfig::default(),
            breaker: Arc::new(CircuitBreaker::with_defaults("quick-deploy")),
            limiter: Arc::new(RateLimiter::new(config.max_requests, config.window_ms)),
        })
    }

    async fn post_once(
        &self,
        endpoint: &str,
        request: &QuickDeployRequest,
    ) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(endpoint)
            .header("x-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout {
                        operation: "quick-deploy".to_string(),
                        elapsed_ms: 0,
                    }
                } else {
                    AgentError::Http(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let body: serde_json::Value = response.json().await.map_err(|e| AgentError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message: format!("malformed response body: {e}"),
            })?;
            // Anything other than a JSON object is treated as a bad response
            if !body.is_object() {
                return Err(AgentError::Api {
                    endpoint: endpoint.to_string(),
                    status: status.as_u16(),
                    message: "response is not a JSON object".to_string(),
                });
            }
            return Ok(body);
        }

        let body = response.text().await.unwrap_or_default();
        warn!("quick-deploy returned {}: {}", status, body);
        Err(map_status(endpoint, status.as_u16(), body))
    }
}

#[async_trait]
impl RegistrationClient for QuickDeployClient {
    /// Register a completed deployment with the backend.
    ///
    /// Validation failures raise immediately with no network call; transient
    /// failures retry inside the circuit breaker after a rate-limit slot.
    async fn register(&self, request: &QuickDeployRequest) -> Result<serde_json::Value> {
        request.validate()?;

        self.limiter.wait_for_slot().await;

        let endpoint = format!("{}/quick-deploy", self.base_url);
        debug!("registering deployment for {}", request.agent_name);

        let response = self
            .breaker
            .execute(|| {
                with_retry("quick-deploy", &self.retry, || {
                    self.post_once(&endpoint, request)
                })
            })
            .await?;

        info!("deployment '{}' registered with backend", request.agent_name);
        Ok(response)
    }
}

/// Map an HTTP status to the error taxonomy.
///
/// 400 is the caller's fault (not retried), auth and not-found are terminal
/// API errors, 429/5xx are degraded-service conditions worth retrying.
fn map_status(endpoint: &str, status: u16, body: String) -> AgentError {
    match status {
        400 => AgentError::validation("request", format!("backend rejected payload: {body}")),
        401 | 403 | 404 => AgentError::Api {
            endpoint: endpoint.to_string(),
            status,
            message: body,
        },
        429 => AgentError::Service {
            endpoint: endpoint.to_string(),
            status,
            message: "rate limited by backend".to_string(),
        },
        s if s >= 500 => AgentError::Service {
            endpoint: endpoint.to_string(),
            status,
            message: body,
        },
        _ => AgentError::Api {
            endpoint: endpoint.to_string(),
            status,
            message: body,
        },
    }
}
