//! RPC-backed chain client
//!
//! Sends the three deployment transactions through an alloy HTTP provider
//! with the signer wallet attached. Each send waits for its receipt and
//! verifies the status before the caller may continue.

use crate::chain::{
    to_token_units, ChainClient, FundCreated, FundCreatedEvent, IFundFactory, IPersonalFund,
    IERC20, PaymentTransferEvent,
};
use crate::config::ChainConfig;
use crate::error::{AgentError, Result};
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};
use zeroize::Zeroize;

/// Chain client over a JSON-RPC HTTP provider with an attached signer
pub struct RpcChainClient {
    provider: DynProvider,
    signer_address: Address,
    factory: Address,
    payment_token: Address,
    payment_recipient: Address,
    payment_amount: U256,
    confirmation_timeout: Duration,
}

impl RpcChainClient {
    /// Build from config; the private key is read from `FUNDRY_PRIVATE_KEY`
    /// (or `PRIVATE_KEY`) and zeroized after parsing.
    pub fn from_env(config: &ChainConfig) -> Result<Self> {
        let mut private_key = std::env::var("FUNDRY_PRIVATE_KEY")
            .or_else(|_| std::env::var("PRIVATE_KEY"))
            .map_err(|_| {
                AgentError::Wallet(
                    "FUNDRY_PRIVATE_KEY or PRIVATE_KEY environment variable not set".to_string(),
                )
            })?;

        let result = Self::new(config, &private_key);
        private_key.zeroize();
        result
    }

    pub fn new(config: &ChainConfig, private_key: &str) -> Result<Self> {
        let mut key = private_key.trim_start_matches("0x").to_string();
        let signer: PrivateKeySigner = key
            .parse()
            .map_err(|e| AgentError::Wallet(format!("Invalid private key: {e}")))?;
        key.zeroize();

        let signer_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let rpc_url = config
            .rpc_url
            .parse()
            .map_err(|e| AgentError::Wallet(format!("Invalid RPC URL: {e}")))?;
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(rpc_url)
            .erased();

        info!("Chain client initialized, signer {signer_address}");

        Ok(Self {
            provider,
            signer_address,
            factory: parse_address("chain.factory_address", &config.factory_address)?,
            payment_token: parse_address("chain.payment_token", &config.payment_token)?,
            payment_recipient: parse_address(
                "chain.payment_recipient",
                &config.payment_recipient,
            )?,
            payment_amount: to_token_units(config.payment_amount),
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
        })
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address> {
    value
        .parse()
        .map_err(|e| AgentError::validation(field, format!("invalid address: {e}")))
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn signer_address(&self) -> Address {
        self.signer_address
    }

    async fn simulate_deployment(&self, ai_wallet: Address) -> Result<()> {
        let token = IERC20::new(self.payment_token, self.provider.clone());

        let balance = token
            .balanceOf(self.signer_address)
            .call()
            .await
            .map_err(|e| AgentError::Contract(format!("balanceOf call failed: {e}")))?;
        if balance < self.payment_amount {
            return Err(AgentError::Payment(format!(
                "insufficient payment token balance: have {balance}, need {}",
                self.payment_amount
            )));
        }

        let factory = IFundFactory::new(self.factory, self.provider.clone());
        factory
            .createPersonalizedFunds(true, ai_wallet, self.payment_token)
            .call()
            .await
            .map_err(|e| {
                AgentError::validation("simulation", format!("fund creation would revert: {e}"))
            })?;

        let would_transfer = token
            .transfer(self.payment_recipient, self.payment_amount)
            .call()
            .await
            .map_err(|e| {
                AgentError::validation("simulation", format!("fee transfer would revert: {e}"))
            })?;
        if !would_transfer {
            return Err(AgentError::Payment(
                "fee transfer simulation returned false".to_string(),
            ));
        }

        debug!("deployment simulation passed for ai_wallet {ai_wallet}");
        Ok(())
    }

    async fn create_fund(&self, ai_wallet: Address) -> Result<FundCreated> {
        let factory = IFundFactory::new(self.factory, self.provider.clone());

        let pending = factory
            .createPersonalizedFunds(true, ai_wallet, self.payment_token)
            .send()
            .await
            .map_err(|e| AgentError::Contract(format!("createPersonalizedFunds send: {e}")))?;

        let receipt = pending
            .with_timeout(Some(self.confirmation_timeout))
            .get_receipt()
            .await
            .map_err(|e| AgentError::Contract(format!("createPersonalizedFunds receipt: {e}")))?;

        if !receipt.status() {
            return Err(AgentError::Contract(format!(
                "createPersonalizedFunds reverted in tx {:#x}",
                receipt.transaction_hash
            )));
        }

        // The created address is the first indexed topic of PersonalFundCreated
        let fund_address = receipt
            .inner
            .logs()
            .iter()
            .find_map(|log| {
                if log.topic0() != Some(&IFundFactory::PersonalFundCreated::SIGNATURE_HASH) {
                    return None;
                }
                IFundFactory::PersonalFundCreated::decode_log(&log.inner)
                    .ok()
                    .map(|decoded| decoded.data.fundAddress)
            })
            .ok_or_else(|| {
                AgentError::Contract(format!(
                    "PersonalFundCreated event not found in tx {:#x}",
                    receipt.transaction_hash
                ))
            })?;

        let tx_hash = format!("{:#x}", receipt.transaction_hash);
        info!("Fund created at {fund_address} (tx {tx_hash})");

        Ok(FundCreated {
            tx_hash,
            fund_address,
        })
    }

    async fn transfer_payment(&self) -> Result<String> {
        let token = IERC20::new(self.payment_token, self.provider.clone());

        let pending = token
            .transfer(self.payment_recipient, self.payment_amount)
            .send()
            .await
            .map_err(|e| AgentError::Contract(format!("fee transfer send: {e}")))?;

        let receipt = pending
            .with_timeout(Some(self.confirmation_timeout))
            .get_receipt()
            .await
            .map_err(|e| AgentError::Contract(format!("fee transfer receipt: {e}")))?;

        if !receipt.status() {
            return Err(AgentError::Payment(format!(
                "fee transfer reverted in tx {:#x}",
                receipt.transaction_hash
            )));
        }

        let tx_hash = format!("{:#x}", receipt.transaction_hash);
        info!(
            "Payment of {} raw units sent to {} (tx {tx_hash})",
            self.payment_amount, self.payment_recipient
        );
        Ok(tx_hash)
    }

    async fn enable_trading(&self, fund_address: Address) -> Result<String> {
        let fund = IPersonalFund::new(fund_address, self.provider.clone());

        let pending = fund
            .setTradingEnabled(true)
            .send()
            .await
            .map_err(|e| AgentError::Contract(format!("setTradingEnabled send: {e}")))?;

        let receipt = pending
            .with_timeout(Some(self.confirmation_timeout))
            .get_receipt()
            .await
            .map_err(|e| AgentError::Contract(format!("setTradingEnabled receipt: {e}")))?;

        if !receipt.status() {
            return Err(AgentError::Contract(format!(
                "setTradingEnabled reverted in tx {:#x}",
                receipt.transaction_hash
            )));
        }

        let tx_hash = format!("{:#x}", receipt.transaction_hash);
        info!("Trading enabled on {fund_address} (tx {tx_hash})");
        Ok(tx_hash)
    }

    async fn latest_block(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| AgentError::Contract(format!("get_block_number: {e}")))
    }

    async fn fund_creations(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<FundCreatedEvent>> {
        let filter = Filter::new()
            .address(self.factory)
            .event_signature(IFundFactory::PersonalFundCreated::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| AgentError::Contract(format!("get_logs (fund creations): {e}")))?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let decoded = match IFundFactory::PersonalFundCreated::decode_log(&log.inner) {
                Ok(d) => d,
                Err(e) => {
                    debug!("skipping undecodable PersonalFundCreated log: {e}");
                    continue;
                }
            };
            events.push(FundCreatedEvent {
                fund_address: format!("{:#x}", decoded.data.fundAddress),
                owner: format!("{:#x}", decoded.data.owner),
                is_token_fund: decoded.data.isTokenFund,
                tx_hash: log
                    .transaction_hash
                    .map(|h| format!("{h:#x}"))
                    .unwrap_or_default(),
                block_number: log.block_number.unwrap_or_default(),
            });
        }
        Ok(events)
    }

    async fn payment_transfers(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PaymentTransferEvent>> {
        let filter = Filter::new()
            .address(self.payment_token)
            .event_signature(IERC20::Transfer::SIGNATURE_HASH)
            .topic2(B256::from(self.payment_recipient.into_word()))
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| AgentError::Contract(format!("get_logs (transfers): {e}")))?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let decoded = match IERC20::Transfer::decode_log(&log.inner) {
                Ok(d) => d,
                Err(e) => {
                    debug!("skipping undecodable Transfer log: {e}");
                    continue;
                }
            };
            events.push(PaymentTransferEvent {
                from: format!("{:#x}", decoded.data.from),
                to: format!("{:#x}", decoded.data.to),
                value: decoded.data.value,
                tx_hash: log
                    .transaction_hash
                    .map(|h| format!("{h:#x}"))
                    .unwrap_or_default(),
                block_number: log.block_number.unwrap_or_default(),
            });
        }
        Ok(events)
    }
}
