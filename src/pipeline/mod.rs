//! Deployment pipeline
//!
//! Runs the full deployment for one job: simulate, create the fund, pay the
//! fee, enable trading, then register with the backend. Steps execute in
//! strict order with each receipt awaited before the next send; the tracker
//! is updated after every step so partial progress survives a crash.
//!
//! There is no rollback. On-chain value already moved; a failed deployment
//! keeps its artifacts in the tracker and a retry resumes from them instead
//! of re-spending.

use crate::backend::{QuickDeployRequest, RegistrationClient};
use crate::chain::ChainClient;
use crate::error::{AgentError, Result};
use crate::protocol::job::DeploymentRequest;
use crate::tracker::{RecordUpdate, TransactionTracker};
use alloy::primitives::Address;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a completed deployment, fed into the deliverable
#[derive(Debug, Clone)]
pub struct DeploymentOutcome {
    pub agent_name: String,
    pub contract_address: String,
    pub creation_tx_hash: String,
    pub payment_tx_hash: String,
    pub backend_response: serde_json::Value,
}

/// Composes chain, backend, and tracker into the deployment workflow
pub struct DeploymentPipeline {
    chain: Arc<dyn ChainClient>,
    backend: Arc<dyn RegistrationClient>,
    tracker: Arc<TransactionTracker>,
    deploy_source: String,
    referral_code: Option<String>,
}

impl DeploymentPipeline {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        backend: Arc<dyn RegistrationClient>,
        tracker: Arc<TransactionTracker>,
        deploy_source: String,
        referral_code: Option<String>,
    ) -> Self {
        Self {
            chain,
            backend,
            tracker,
            deploy_source,
            referral_code,
        }
    }

    /// Execute the deployment for `record_id`.
    ///
    /// Steps already reflected in the record (from a previous interrupted
    /// attempt) are reused, not re-sent. The backend is only called once all
    /// three on-chain steps have succeeded.
    pub async fn execute(
        &self,
        record_id: &str,
        request: &DeploymentRequest,
    ) -> Result<DeploymentOutcome> {
        let record = self
            .tracker
            .get(record_id)
            .await
            .ok_or_else(|| AgentError::Processing(format!("no record {record_id}")))?;

        let ai_wallet: Address = request.ai_wallet.parse().map_err(|e| {
            AgentError::validation("aiWallet", format!("invalid address: {e}"))
        })?;

        // Step 1: simulate the whole sequence before spending any gas.
        // Skipped when a prior attempt already created the fund.
        if record.contract_creation_tx_hash.is_none() {
            self.chain.simulate_deployment(ai_wallet).await?;
            debug!("simulation passed for job {}", request.job_id);
        }

        // Step 2: create the fund, or reuse the artifact from a prior attempt
        let (creation_tx_hash, contract_address) = match (
            record.contract_creation_tx_hash.clone(),
            record.contract_address.clone(),
        ) {
            (Some(tx), Some(addr)) => {
                info!("reusing fund {addr} created in {tx} for job {}", request.job_id);
                (tx, addr)
            }
            _ => {
                let created = self.chain.create_fund(ai_wallet).await?;
                let addr = format!("{:#x}", created.fund_address);
                self.tracker
                    .update(
                        record_id,
                        RecordUpdate {
                            contract_creation_tx_hash: Some(created.tx_hash.clone()),
                            contract_address: Some(addr.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                (created.tx_hash, addr)
            }
        };

        // Step 3: fee payment, reusing a recorded hash when present
        let payment_tx_hash = match record.payment_tx_hash.clone() {
            Some(tx) => {
                info!("reusing recorded payment {tx} for job {}", request.job_id);
                tx
            }
            None => {
                let tx = self.chain.transfer_payment().await?;
                self.tracker
                    .update(
                        record_id,
                        RecordUpdate {
                            payment_tx_hash: Some(tx.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                tx
            }
        };

        // Step 4: enable trading on the new fund (idempotent on-chain)
        let fund_address: Address = contract_address.parse().map_err(|e| {
            AgentError::Contract(format!("recorded fund address unparseable: {e}"))
        })?;
        self.chain.enable_trading(fund_address).await?;

        // Step 5: register with the backend. A failure here fails the whole
        // deployment even though the chain steps succeeded; the artifacts
        // above stay recorded for the retry.
        let registration = QuickDeployRequest {
            agent_name: request.agent_name.clone(),
            contract_creation_txn_hash: creation_tx_hash.clone(),
            creating_user_wallet_address: request.buyer.clone(),
            payment_txn_hash: payment_tx_hash.clone(),
            deploy_source: self.deploy_source.clone(),
            referral_code: request.referral_code.clone().or_else(|| self.referral_code.clone()),
            is_token_fund: Some(true),
        };
        let backend_response = self.backend.register(&registration).await?;

        info!(
            "deployment complete for job {}: fund {contract_address}",
            request.job_id
        );

        Ok(DeploymentOutcome {
            agent_name: request.agent_name.clone(),
            contract_address,
            creation_tx_hash,
            payment_tx_hash,
            backend_response,
        })
    }
}
