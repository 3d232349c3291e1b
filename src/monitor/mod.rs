//! On-chain event monitor
//!
//! Polls the factory and payment token for logs, matches incoming payments
//! to fund creations per wallet, folds each match into the owning
//! transaction record, and hands matches to subscribers over an owned typed
//! channel. No global event bus; the monitor owns its signals.

use crate::chain::ChainClient;
use crate::error::Result;
use crate::tracker::{RecordUpdate, TransactionTracker};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long a registered payment waits for its matching fund creation
const PENDING_PAYMENT_TTL: Duration = Duration::from_secs(300);

/// A payment joined with its fund-creation transaction
#[derive(Debug, Clone)]
pub struct MatchedDeployment {
    pub wallet: String,
    pub payment_tx_hash: String,
    pub creation_tx_hash: String,
    pub fund_address: String,
    pub block_number: u64,
}

#[derive(Debug, Clone)]
struct PendingPayment {
    tx_hash: String,
    registered_at: Instant,
}

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Poll interval for new logs
    pub poll_interval: Duration,
    /// Blocks scanned per poll at most
    pub max_block_span: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_block_span: 1000,
        }
    }
}

/// Watches fund-creation and payment events and pairs them per wallet
pub struct EventMonitor {
    chain: Arc<dyn ChainClient>,
    tracker: Arc<TransactionTracker>,
    config: MonitorConfig,
    pending_payments: DashMap<String, PendingPayment>,
    matched_tx: mpsc::Sender<MatchedDeployment>,
    matched_rx: tokio::sync::Mutex<Option<mpsc::Receiver<MatchedDeployment>>>,
}

impl EventMonitor {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        tracker: Arc<TransactionTracker>,
        config: MonitorConfig,
    ) -> Self {
        let (matched_tx, matched_rx) = mpsc::channel(64);
        Self {
            chain,
            tracker,
            config,
            pending_payments: DashMap::new(),
            matched_tx,
            matched_rx: tokio::sync::Mutex::new(Some(matched_rx)),
        }
    }

    /// Take the matched-deployment receiver. Single consumer; later calls
    /// return None.
    pub async fn subscribe(&self) -> Option<mpsc::Receiver<MatchedDeployment>> {
        self.matched_rx.lock().await.take()
    }

    /// Remember a payment from `wallet` so the next fund creation for that
    /// wallet can be joined with it. Entries expire after five minutes.
    pub fn register_pending_payment(&self, wallet: &str, payment_tx_hash: &str) {
        self.pending_payments.insert(
            wallet.to_ascii_lowercase(),
            PendingPayment {
                tx_hash: payment_tx_hash.to_string(),
                registered_at: Instant::now(),
            },
        );
        debug!("pending payment registered for {wallet}");
    }

    pub fn pending_payment_count(&self) -> usize {
        self.pending_payments.len()
    }

    /// Backward lookup: the most recent fund-creation tx hash for a wallet
    /// in a block range. Used when the payment proof arrives out-of-band and
    /// the creation hash has to be recovered.
    pub async fn find_creation_tx(
        &self,
        wallet: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Option<String>> {
        let wallet = wallet.to_ascii_lowercase();
        let events = self.chain.fund_creations(from_block, to_block).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.owner.to_ascii_lowercase() == wallet)
            .max_by_key(|e| e.block_number)
            .map(|e| e.tx_hash))
    }

    /// Poll loop. Runs until `shutdown` flips to true; the caller usually
    /// spawns this.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut from_block = self.chain.latest_block().await?.saturating_add(1);
        info!("event monitor started from block {from_block}");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("event monitor stopping");
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.poll(&mut from_block).await {
                        warn!("event monitor poll failed: {e}");
                    }
                }
            }
        }
    }

    async fn poll(&self, from_block: &mut u64) -> Result<()> {
        let latest = self.chain.latest_block().await?;
        if latest < *from_block {
            return Ok(());
        }
        let to_block = latest.min(*from_block + self.config.max_block_span - 1);

        self.expire_pending();

        for transfer in self.chain.payment_transfers(*from_block, to_block).await? {
            // A buyer's payment lands before their fund creation; remember it
            self.register_pending_payment(&transfer.from, &transfer.tx_hash);
        }

        for creation in self.chain.fund_creations(*from_block, to_block).await? {
            self.match_creation(
                &creation.owner,
                &creation.tx_hash,
                &creation.fund_address,
                creation.block_number,
            )
            .await;
        }

        *from_block = to_block + 1;
        Ok(())
    }

    /// Join a fund creation with the wallet's pending payment, if any
    pub async fn match_creation(
        &self,
        wallet: &str,
        creation_tx_hash: &str,
        fund_address: &str,
        block_number: u64,
    ) {
        let key = wallet.to_ascii_lowercase();
        let Some((_, pending)) = self.pending_payments.remove(&key) else {
            debug!("fund creation for {wallet} with no pending payment");
            return;
        };

        let matched = MatchedDeployment {
            wallet: key,
            payment_tx_hash: pending.tx_hash,
            creation_tx_hash: creation_tx_hash.to_string(),
            fund_address: fund_address.to_string(),
            block_number,
        };
        info!(
            "matched payment {} with creation {} for {wallet}",
            matched.payment_tx_hash, matched.creation_tx_hash
        );

        self.fold_into_tracker(&matched).await;

        if self.matched_tx.send(matched).await.is_err() {
            debug!("no subscriber for matched deployment");
        }
    }

    // Record the observed hashes on the wallet's in-flight record; the
    // write-once fields make this safe alongside the pipeline's own updates
    async fn fold_into_tracker(&self, matched: &MatchedDeployment) {
        let Some(record) = self.tracker.latest_for_wallet(&matched.wallet).await else {
            debug!("matched deployment for {} has no tracked record", matched.wallet);
            return;
        };
        let update = RecordUpdate {
            payment_tx_hash: Some(matched.payment_tx_hash.clone()),
            contract_creation_tx_hash: Some(matched.creation_tx_hash.clone()),
            contract_address: Some(matched.fund_address.clone()),
            ..Default::default()
        };
        if let Err(e) = self.tracker.update(&record.id, update).await {
            warn!("could not fold match into record {}: {e}", record.id);
        }
    }

    fn expire_pending(&self) {
        self.pending_payments
            .retain(|_, p| p.registered_at.elapsed() < PENDING_PAYMENT_TTL);
    }
}
