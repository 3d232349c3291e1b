//! Transaction lifecycle tracking
//!
//! Durable record of every deployment attempt: created on job acceptance,
//! updated after each pipeline step, never deleted. An in-memory cache holds
//! the most recent N records; the full set is persisted through a
//! `RecordStore`.

pub mod record;
pub mod store;

pub use record::{RecordUpdate, TransactionRecord, TxStatus};
pub use store::{JsonFileStore, MemoryStore, RecordStore};

use crate::error::{AgentError, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

/// Counts per status plus a derived success rate
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TrackerStatistics {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// completed / (completed + failed), 0 when nothing finished yet
    pub success_rate: f64,
}

enum PersistRequest {
    Snapshot(Vec<TransactionRecord>),
    Flush(Vec<TransactionRecord>, oneshot::Sender<Result<()>>),
}

/// Tracks deployment lifecycle records
pub struct TransactionTracker {
    store: Arc<dyn RecordStore>,
    cache: RwLock<VecDeque<TransactionRecord>>,
    cache_size: usize,
    persist_tx: mpsc::UnboundedSender<PersistRequest>,
}

impl TransactionTracker {
    /// Must be called from within a tokio runtime; spawns the persist writer.
    pub fn new(store: Arc<dyn RecordStore>, cache_size: usize) -> Self {
        let (persist_tx, mut persist_rx) = mpsc::unbounded_channel();

        // A single writer consumes snapshots in the order they were taken,
        // so a slow write can never land after a newer one
        let writer_store = store.clone();
        tokio::spawn(async move {
            while let Some(request) = persist_rx.recv().await {
                match request {
                    PersistRequest::Snapshot(records) => {
                        if let Err(e) = writer_store.persist(&records).await {
                            warn!("failed to persist transaction records: {e}");
                        }
                    }
                    PersistRequest::Flush(records, ack) => {
                        let _ = ack.send(writer_store.persist(&records).await);
                    }
                }
            }
        });

        Self {
            store,
            cache: RwLock::new(VecDeque::new()),
            cache_size,
            persist_tx,
        }
    }

    /// Load the most recent records from the store into the cache
    pub async fn load(&self) -> Result<usize> {
        let records = self.store.load_recent(self.cache_size).await?;
        let count = records.len();
        *self.cache.write().await = records.into();
        info!("loaded {count} transaction records");
        Ok(count)
    }

    /// Create a new pending record for a job.
    ///
    /// Rejects a second non-terminal record for the same job; completed or
    /// failed history does not block a fresh attempt.
    pub async fn create(
        &self,
        job_id: &str,
        user_wallet: &str,
        agent_name: &str,
        payment_tx_hash: Option<String>,
    ) -> Result<TransactionRecord> {
        let mut cache = self.cache.write().await;

        if let Some(existing) = cache
            .iter()
            .find(|r| r.job_id == job_id && !r.status.is_terminal())
        {
            return Err(AgentError::Processing(format!(
                "job {job_id} already has an in-flight record {}",
                existing.id
            )));
        }

        let mut record = TransactionRecord::new(job_id, user_wallet, agent_name);
        record.payment_tx_hash = payment_tx_hash;

        cache.push_back(record.clone());
        while cache.len() > self.cache_size {
            cache.pop_front();
        }

        self.persist_snapshot(&cache);
        debug!("created record {} for job {job_id}", record.id);
        Ok(record)
    }

    /// Merge a partial update into a record.
    ///
    /// Bumps `updated_at`; stamps `completed_at` on the first terminal
    /// transition. Hash and address fields are write-once: a set field is
    /// never cleared or replaced with an empty value.
    pub async fn update(&self, id: &str, update: RecordUpdate) -> Result<TransactionRecord> {
        let mut cache = self.cache.write().await;
        let record = cache
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AgentError::Processing(format!("no record with id {id}")))?;

        if let Some(status) = update.status {
            if !record.status.can_transition_to(status) {
                return Err(AgentError::Processing(format!(
                    "invalid status transition {} -> {} on record {id}",
                    record.status, status
                )));
            }
            if status.is_terminal() && record.completed_at.is_none() {
                record.completed_at = Some(Utc::now());
            }
            record.status = status;
        }

        set_once(&mut record.payment_tx_hash, update.payment_tx_hash);
        set_once(
            &mut record.contract_creation_tx_hash,
            update.contract_creation_tx_hash,
        );
        set_once(&mut record.contract_address, update.contract_address);

        if let Some(sent) = update.notification_sent {
            record.notification_sent = sent;
        }
        if let Some(error) = update.error {
            record.error = Some(error);
        }
        record.updated_at = Utc::now();

        let updated = record.clone();
        self.persist_snapshot(&cache);
        Ok(updated)
    }

    pub async fn get(&self, id: &str) -> Option<TransactionRecord> {
        self.cache.read().await.iter().find(|r| r.id == id).cloned()
    }

    /// Latest record for a job, preferring a non-terminal one
    pub async fn get_by_job(&self, job_id: &str) -> Option<TransactionRecord> {
        let cache = self.cache.read().await;
        cache
            .iter()
            .rev()
            .find(|r| r.job_id == job_id && !r.status.is_terminal())
            .or_else(|| cache.iter().rev().find(|r| r.job_id == job_id))
            .cloned()
    }

    /// Latest non-terminal record for a wallet; used to fold observed
    /// on-chain activity back into the owning record
    pub async fn latest_for_wallet(&self, wallet: &str) -> Option<TransactionRecord> {
        let cache = self.cache.read().await;
        cache
            .iter()
            .rev()
            .find(|r| r.user_wallet.eq_ignore_ascii_case(wallet) && !r.status.is_terminal())
            .cloned()
    }

    /// Reconciliation sweep for crashed or interrupted deployments.
    ///
    /// Non-terminal records untouched for longer than `max_age` go back to
    /// pending with their retry count bumped. Returns the affected records.
    pub async fn mark_stale_for_retry(&self, max_age: Duration) -> Vec<TransactionRecord> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(max_age).unwrap_or_else(|_| ChronoDuration::seconds(300));
        let mut cache = self.cache.write().await;
        let mut stale = Vec::new();

        for record in cache.iter_mut() {
            if !record.status.is_terminal() && record.updated_at < cutoff {
                record.retry_count += 1;
                record.status = TxStatus::Pending;
                record.updated_at = Utc::now();
                warn!(
                    "record {} (job {}) stale, reset to pending (retry {})",
                    record.id, record.job_id, record.retry_count
                );
                stale.push(record.clone());
            }
        }

        if !stale.is_empty() {
            self.persist_snapshot(&cache);
        }
        stale
    }

    pub async fn statistics(&self) -> TrackerStatistics {
        let cache = self.cache.read().await;
        let mut stats = TrackerStatistics {
            total: cache.len(),
            ..Default::default()
        };
        for record in cache.iter() {
            match record.status {
                TxStatus::Pending => stats.pending += 1,
                TxStatus::Processing => stats.processing += 1,
                TxStatus::Completed => stats.completed += 1,
                TxStatus::Failed => stats.failed += 1,
            }
        }
        let finished = stats.completed + stats.failed;
        if finished > 0 {
            stats.success_rate = stats.completed as f64 / finished as f64;
        }
        stats
    }

    /// Flush the cache to the store, waiting for the write to land.
    ///
    /// Queued through the same writer as every other persist, so earlier
    /// snapshots are on disk by the time this returns.
    pub async fn flush(&self) -> Result<()> {
        let snapshot: Vec<TransactionRecord> =
            self.cache.read().await.iter().cloned().collect();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.persist_tx
            .send(PersistRequest::Flush(snapshot, ack_tx))
            .map_err(|_| AgentError::Internal("record writer stopped".into()))?;
        ack_rx
            .await
            .map_err(|_| AgentError::Internal("record writer stopped".into()))?
    }

    // Persistence is best-effort: failures are logged, never surfaced.
    // The chain itself is the authoritative state.
    fn persist_snapshot(&self, cache: &VecDeque<TransactionRecord>) {
        let snapshot: Vec<TransactionRecord> = cache.iter().cloned().collect();
        let _ = self.persist_tx.send(PersistRequest::Snapshot(snapshot));
    }
}

fn set_once(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        if let Some(v) = value {
            if !v.is_empty() {
                *slot = Some(v);
            }
        }
    }
}
