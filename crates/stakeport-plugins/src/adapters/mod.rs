//! Protocol adapters: one per staking protocol family.
//!
//! Adapters are state-free after construction. Each holds only read-only
//! handles derived from its config; anything per-operation (nonces, session
//! ids) is scoped to a single call.

pub mod evm;
mod glif;
mod kiln_cardano;
mod kiln_ethereum;
mod stakekit;
mod tarot;
mod thorchain_yield;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use stakeport_common::errors::Result;
use stakeport_common::types::{AssetRef, ChangeQuote, StakePosition, YieldInfo};
use stakeport_common::wallet::StakeWallet;

use crate::policy::PolicyConfig;

pub use glif::GlifInfinityPoolConfig;
pub use kiln_cardano::KilnCardanoConfig;
pub use kiln_ethereum::KilnEthereumConfig;
pub use stakekit::StakeKitConfig;
pub use tarot::TarotVelodromeConfig;
pub use thorchain_yield::ThorchainYieldConfig;

/// Connection parameters for one concrete staking integration. A closed
/// union: adding a protocol family means adding a variant here and a
/// branch in [`make_adapter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AdapterConfig {
    CardanoPooledKiln(KilnCardanoConfig),
    EthereumPooledKiln(KilnEthereumConfig),
    GlifInfinityPool(GlifInfinityPoolConfig),
    TarotVelodromePool(TarotVelodromeConfig),
    CoreumNativeStakeKit(StakeKitConfig),
    ThorchainYield(ThorchainYieldConfig),
}

/// The uniform interface each protocol integration implements.
///
/// Operations a protocol has no flow for must fail with
/// `StakeError::UnsupportedOperation` rather than return an empty quote;
/// callers must never proceed believing a no-op succeeded.
#[async_trait]
pub trait StakeAdapter: Send + Sync {
    fn stake_policy_id(&self) -> &str;

    async fn fetch_stake_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote>;

    async fn fetch_unstake_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote>;

    /// Unstake sized by exact output rather than exact input.
    async fn fetch_unstake_exact_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote>;

    async fn fetch_claim_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote>;

    async fn fetch_stake_position(&self, wallet: Arc<dyn StakeWallet>) -> Result<StakePosition>;

    async fn fetch_yield_info(&self) -> Result<YieldInfo>;
}

/// Builds the adapter for a policy. The match is exhaustive on purpose: an
/// unknown tag is a compile-time error, never a runtime fallback.
pub fn make_adapter(config: &PolicyConfig) -> Result<Arc<dyn StakeAdapter>> {
    match &config.adapter_config {
        AdapterConfig::CardanoPooledKiln(inner) => Ok(Arc::new(
            kiln_cardano::KilnCardanoAdapter::new(config, inner)?,
        )),
        AdapterConfig::EthereumPooledKiln(inner) => Ok(Arc::new(
            kiln_ethereum::KilnEthereumAdapter::new(config, inner)?,
        )),
        AdapterConfig::GlifInfinityPool(inner) => {
            Ok(Arc::new(glif::GlifInfinityPoolAdapter::new(config, inner)?))
        }
        AdapterConfig::TarotVelodromePool(inner) => {
            Ok(Arc::new(tarot::TarotVelodromeAdapter::new(config, inner)?))
        }
        AdapterConfig::CoreumNativeStakeKit(inner) => {
            Ok(Arc::new(stakekit::StakeKitAdapter::new(config, inner)?))
        }
        AdapterConfig::ThorchainYield(inner) => Ok(Arc::new(
            thorchain_yield::ThorchainYieldAdapter::new(config, inner)?,
        )),
    }
}
