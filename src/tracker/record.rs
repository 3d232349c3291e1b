//! Transaction record lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deployment lifecycle status.
///
/// Transitions are monotonic: pending → processing → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Completed | TxStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        match (self, next) {
            (TxStatus::Pending, TxStatus::Processing) => true,
            (TxStatus::Pending, TxStatus::Completed | TxStatus::Failed) => true,
            (TxStatus::Processing, TxStatus::Completed | TxStatus::Failed) => true,
            // Stale-record sweep resets are handled out of band
            _ => *self == next,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Processing => "processing",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The tracked lifecycle state of one deployment attempt.
///
/// At most one non-terminal record exists per job. Hash and address fields
/// are write-once; `completed_at` is stamped on the first terminal
/// transition and never again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub job_id: String,
    pub user_wallet: String,
    pub agent_name: String,
    #[serde(default)]
    pub payment_tx_hash: Option<String>,
    #[serde(default)]
    pub contract_creation_tx_hash: Option<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
    pub status: TxStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub notification_sent: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    pub fn new(job_id: &str, user_wallet: &str, agent_name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            user_wallet: user_wallet.to_string(),
            agent_name: agent_name.to_string(),
            payment_tx_hash: None,
            contract_creation_tx_hash: None,
            contract_address: None,
            status: TxStatus::Pending,
            retry_count: 0,
            notification_sent: false,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Partial update merged into a record by the tracker
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub status: Option<TxStatus>,
    pub payment_tx_hash: Option<String>,
    pub contract_creation_tx_hash: Option<String>,
    pub contract_address: Option<String>,
    pub notification_sent: Option<bool>,
    pub error: Option<String>,
}

impl RecordUpdate {
    pub fn status(status: TxStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_error(status: TxStatus, error: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_monotonic() {
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Processing));
        assert!(TxStatus::Processing.can_transition_to(TxStatus::Completed));
        assert!(TxStatus::Processing.can_transition_to(TxStatus::Failed));
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Failed));

        assert!(!TxStatus::Completed.can_transition_to(TxStatus::Pending));
        assert!(!TxStatus::Failed.can_transition_to(TxStatus::Processing));
        assert!(!TxStatus::Processing.can_transition_to(TxStatus::Pending));
        assert!(!TxStatus::Completed.can_transition_to(TxStatus::Failed));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TxStatus::Pending.is_terminal());
        assert!(!TxStatus::Processing.is_terminal());
        assert!(TxStatus::Completed.is_terminal());
        assert!(TxStatus::Failed.is_terminal());
    }

    #[test]
    fn test_new_record_shape() {
        let record = TransactionRecord::new("job-1", "0xabc", "my-fund");
        assert_eq!(record.status, TxStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(record.completed_at.is_none());
        assert!(record.payment_tx_hash.is_none());
    }
}
