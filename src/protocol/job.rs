//! Protocol job types
//!
//! Jobs are owned by the external commerce protocol; the agent only reads
//! and reacts. Payloads are parsed into closed types at this boundary and
//! anything that does not match a known variant is rejected.

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job lifecycle phase, driven by the protocol network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    Request,
    Negotiation,
    Transaction,
    Evaluation,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Request => "REQUEST",
            JobPhase::Negotiation => "NEGOTIATION",
            JobPhase::Transaction => "TRANSACTION",
            JobPhase::Evaluation => "EVALUATION",
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobPhase {
    type Err = AgentError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "REQUEST" => Ok(JobPhase::Request),
            "NEGOTIATION" => Ok(JobPhase::Negotiation),
            "TRANSACTION" => Ok(JobPhase::Transaction),
            "EVALUATION" => Ok(JobPhase::Evaluation),
            other => Err(AgentError::validation(
                "phase",
                format!("unknown job phase '{other}'"),
            )),
        }
    }
}

/// A protocol memo attached to a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memo {
    pub id: String,
    #[serde(rename = "nextPhase")]
    pub next_phase: Option<JobPhase>,
    #[serde(default)]
    pub content: Option<String>,
}

/// A unit of work delivered by the protocol network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Buyer wallet identifier
    pub buyer: String,
    pub phase: JobPhase,
    #[serde(default)]
    pub memos: Vec<Memo>,
    /// Raw service-requirement payload, parsed once on acceptance
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Job {
    pub fn latest_memo(&self) -> Option<&Memo> {
        self.memos.last()
    }

    pub fn latest_memo_id(&self) -> String {
        self.latest_memo().map(|m| m.id.clone()).unwrap_or_default()
    }
}

/// Known service requirements, tagged by service type.
///
/// Anything outside this enum fails parsing and rejects the job.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "serviceType")]
pub enum ServiceRequirement {
    #[serde(rename = "deploy_fund")]
    DeployFund {
        #[serde(rename = "agentName")]
        agent_name: Option<String>,
        #[serde(rename = "aiWallet")]
        ai_wallet: Option<String>,
        #[serde(rename = "referralCode")]
        referral_code: Option<String>,
    },
}

/// Immutable deployment parameters, created once per job
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub job_id: String,
    pub buyer: String,
    pub agent_name: String,
    /// Wallet the fund is created for; defaults to the buyer
    pub ai_wallet: String,
    pub referral_code: Option<String>,
}

impl DeploymentRequest {
    /// Parse and validate a job's service requirement.
    ///
    /// `default_agent_name` fills a missing name; the AI wallet falls back
    /// to the buyer wallet.
    pub fn from_job(job: &Job, default_agent_name: &str) -> Result<Self> {
        if job.params.is_null() {
            return Err(AgentError::validation(
                "params",
                "missing service requirement payload",
            ));
        }

        let requirement: ServiceRequirement = serde_json::from_value(job.params.clone())
            .map_err(|e| {
                AgentError::validation("params", format!("unrecognized service requirement: {e}"))
            })?;

        let ServiceRequirement::DeployFund {
            agent_name,
            ai_wallet,
            referral_code,
        } = requirement;

        let agent_name = agent_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_agent_name.to_string());
        let ai_wallet = ai_wallet
            .filter(|w| !w.trim().is_empty())
            .unwrap_or_else(|| job.buyer.clone());

        if !is_hex_address(&ai_wallet) {
            return Err(AgentError::validation(
                "aiWallet",
                "must be a 0x-prefixed 40-hex-digit address",
            ));
        }

        Ok(Self {
            job_id: job.id.clone(),
            buyer: job.buyer.clone(),
            agent_name,
            ai_wallet,
            referral_code,
        })
    }
}

fn is_hex_address(value: &str) -> bool {
    value.len() == 42
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}
