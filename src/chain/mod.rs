//! Chain client for the fund deployment contracts
//!
//! Wraps the factory, payment token, and per-fund contracts behind a thin
//! async seam so the pipeline and monitor can be tested without an RPC node.

use crate::error::Result;
use alloy::primitives::{Address, U256};
use alloy::sol;
use async_trait::async_trait;

pub mod client;

pub use client::RpcChainClient;

/// Payment token uses 6 decimals (USDC-style)
pub const PAYMENT_TOKEN_DECIMALS: u32 = 6;

// Contract bindings (alloy sol! macro)
sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IFundFactory {
        /// Deploy a personalized trading fund for `aiWallet`
        function createPersonalizedFunds(
            bool isTokenFund,
            address aiWallet,
            address paymentToken
        ) external returns (address);

        /// Emitted once per deployed fund
        event PersonalFundCreated(
            address indexed fundAddress,
            address indexed owner,
            bool isTokenFund
        );
    }

    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);

        event Transfer(address indexed from, address indexed to, uint256 value);
    }

    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IPersonalFund {
        function setTradingEnabled(bool enable) external;
    }
}

/// Convert a whole-token fee into raw 6-decimal units
pub fn to_token_units(amount: u64) -> U256 {
    U256::from(amount) * U256::from(10u64.pow(PAYMENT_TOKEN_DECIMALS))
}

/// Result of the fund-creation transaction
#[derive(Debug, Clone)]
pub struct FundCreated {
    pub tx_hash: String,
    pub fund_address: Address,
}

/// Decoded `PersonalFundCreated` log
#[derive(Debug, Clone)]
pub struct FundCreatedEvent {
    pub fund_address: String,
    pub owner: String,
    pub is_token_fund: bool,
    pub tx_hash: String,
    pub block_number: u64,
}

/// Decoded payment-token `Transfer` log
#[derive(Debug, Clone)]
pub struct PaymentTransferEvent {
    pub from: String,
    pub to: String,
    pub value: U256,
    pub tx_hash: String,
    pub block_number: u64,
}

/// Blockchain access seam.
///
/// `RpcChainClient` is the production implementation; tests substitute a
/// hand-rolled double.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address of the single signing wallet
    fn signer_address(&self) -> Address;

    /// Static-call the whole deployment sequence before spending gas:
    /// balance ≥ fee, fund creation call, fee transfer call.
    async fn simulate_deployment(&self, ai_wallet: Address) -> Result<()>;

    /// Send the factory's fund-creation transaction and extract the created
    /// address from the `PersonalFundCreated` log.
    async fn create_fund(&self, ai_wallet: Address) -> Result<FundCreated>;

    /// Transfer the fixed fee to the payment recipient
    async fn transfer_payment(&self) -> Result<String>;

    /// Enable trading on the created fund contract
    async fn enable_trading(&self, fund_address: Address) -> Result<String>;

    /// Latest block number
    async fn latest_block(&self) -> Result<u64>;

    /// `PersonalFundCreated` logs from the factory in a block range
    async fn fund_creations(&self, from_block: u64, to_block: u64)
        -> Result<Vec<FundCreatedEvent>>;

    /// Payment-token `Transfer` logs toward the payment recipient in a range
    async fn payment_transfers(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PaymentTransferEvent>>;
}
