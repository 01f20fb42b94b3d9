//! The wallet capability consumed by every adapter.
//!
//! The surrounding wallet SDK owns keys, balances, and broadcasting; this
//! trait is the narrow slice of it the staking plugins are allowed to touch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::errors::Result;
use crate::types::ApprovePlan;

/// A receive address together with the balance held by that single address,
/// where the chain tracks per-address balances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveAddress {
    pub public_address: String,
    pub native_balance: Option<String>,
}

/// One derived address of a multi-address (UTXO-style) wallet. Index 0 is
/// the primary address used for protocol message-passing transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfo {
    pub public_address: String,
    pub native_balance: Option<String>,
}

/// One output of a spend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendTarget {
    pub public_address: String,
    pub native_amount: String,
    /// Memo attached to the output, for protocols that route operations
    /// through memo-encoded messages.
    pub memo: Option<String>,
}

/// Everything needed to build an unsigned transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendInfo {
    pub token_id: Option<String>,
    pub spend_targets: Vec<SpendTarget>,
    /// Chain-specific parameters: EVM call data and gas overrides, Cosmos
    /// messages, and the like. Passed through to the wallet SDK untouched.
    pub other_params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTx {
    pub native_amount: String,
    pub network_fee: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTx {
    pub txid: String,
    pub network_fee: String,
    pub payload: Value,
}

/// The wallet operations the staking subsystem depends on.
///
/// `make_spend` must fail with `StakeError::InsufficientFunds` when the
/// wallet balance cannot cover the spend, so callers can pre-flight
/// operations without touching a signer.
#[async_trait]
pub trait StakeWallet: Send + Sync {
    /// The wallet's current receive address for the given token.
    async fn get_receive_address(&self, token_id: Option<&str>) -> Result<ReceiveAddress>;

    /// All derived addresses, primary first.
    async fn get_addresses(&self, token_id: Option<&str>) -> Result<Vec<AddressInfo>>;

    /// Wallet-wide confirmed balance for the given token, if tracked.
    fn balance_of(&self, token_id: Option<&str>) -> Option<String>;

    /// Build an unsigned transaction for the described spend.
    async fn make_spend(&self, spend_info: &SpendInfo) -> Result<UnsignedTx>;

    async fn sign_tx(&self, tx: &UnsignedTx) -> Result<SignedTx>;

    /// Broadcast a signed transaction, returning its txid.
    async fn broadcast_tx(&self, tx: &SignedTx) -> Result<String>;

    /// Record a broadcast transaction in the wallet's history.
    async fn save_tx(&self, tx: &SignedTx) -> Result<()>;

    /// Sign an arbitrary message with the wallet key. Used by third-party
    /// staking aggregators for session authentication.
    async fn sign_message(&self, message: &str) -> Result<String>;
}

/// Executes a prepared sequence of spends strictly in order. Later spends
/// may rely on chain state produced by earlier ones (a funding transfer
/// landing before the operation it funds), so there is no concurrency here.
pub struct SpendPlan {
    pub wallet: Arc<dyn StakeWallet>,
    pub spends: Vec<SpendInfo>,
}

#[async_trait]
impl ApprovePlan for SpendPlan {
    async fn execute(&self) -> Result<()> {
        for spend in &self.spends {
            let unsigned = self.wallet.make_spend(spend).await?;
            let signed = self.wallet.sign_tx(&unsigned).await?;
            let txid = self.wallet.broadcast_tx(&signed).await?;
            self.wallet.save_tx(&signed).await?;
            debug!("broadcast spend as {txid}");
        }
        Ok(())
    }
}
