//! Commerce-protocol surface
//!
//! The protocol network drives jobs through fixed phases; this module holds
//! the job types, the deliverable shape, and the agent that reacts to each
//! phase. The network connection itself sits behind [`ProtocolHandle`] so
//! the agent can be exercised without one.

pub mod agent;
pub mod job;

pub use agent::ProtocolAgent;
pub use job::{DeploymentRequest, Job, JobPhase, Memo, ServiceRequirement};

use crate::error::{AgentError, Result};
use crate::pipeline::DeploymentOutcome;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Structured job result returned to the protocol on completion
#[derive(Debug, Clone, Serialize)]
pub struct Deliverable {
    pub success: bool,
    #[serde(rename = "agentName")]
    pub agent_name: String,
    #[serde(rename = "contractAddress", skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(rename = "creationTxHash", skip_serializing_if = "Option::is_none")]
    pub creation_tx_hash: Option<String>,
    #[serde(rename = "paymentTxHash", skip_serializing_if = "Option::is_none")]
    pub payment_tx_hash: Option<String>,
    #[serde(rename = "backendResponse", skip_serializing_if = "Option::is_none")]
    pub backend_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl Deliverable {
    pub fn succeeded(outcome: &DeploymentOutcome) -> Self {
        Self {
            success: true,
            agent_name: outcome.agent_name.clone(),
            contract_address: Some(outcome.contract_address.clone()),
            creation_tx_hash: Some(outcome.creation_tx_hash.clone()),
            payment_tx_hash: Some(outcome.payment_tx_hash.clone()),
            backend_response: Some(outcome.backend_response.clone()),
            error: None,
            error_code: None,
        }
    }

    /// Failure deliverable carrying only a sanitized message, never internals
    pub fn failed(agent_name: &str, err: &AgentError) -> Self {
        Self {
            success: false,
            agent_name: agent_name.to_string(),
            contract_address: None,
            creation_tx_hash: None,
            payment_tx_hash: None,
            backend_response: None,
            error: Some(err.sanitized()),
            error_code: Some(err.code().to_string()),
        }
    }
}

/// Connection to the protocol network.
///
/// `memo_id` references the latest memo the response applies to.
#[async_trait]
pub trait ProtocolHandle: Send + Sync {
    async fn accept(&self, job_id: &str, memo_id: &str, reason: &str) -> Result<()>;
    async fn reject(&self, job_id: &str, memo_id: &str, reason: &str) -> Result<()>;
    async fn deliver(&self, job_id: &str, deliverable: &Deliverable) -> Result<()>;
}
