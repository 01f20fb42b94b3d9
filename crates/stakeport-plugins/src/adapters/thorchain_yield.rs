//! RUNE yield through the Thorchain RUNEPool.
//!
//! Deposits and withdrawals are memo-encoded native deposit messages; a
//! withdrawal expresses the fraction to release in basis points inside the
//! memo. There is no separate claim flow: withdrawals deliver principal
//! and earnings together.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use stakeport_common::errors::{Result, StakeError};
use stakeport_common::types::{
    AssetRef, ChangeQuote, PositionAllocation, PositionAllocationType, QuoteAllocation,
    QuoteAllocationType, StakePosition, YieldInfo, YieldType,
};
use stakeport_common::utils::{amount, fetch};
use stakeport_common::wallet::{SpendInfo, SpendPlan, StakeWallet};

use super::StakeAdapter;
use crate::policy::PolicyConfig;

const DEPOSIT_MEMO: &str = "pool+";
const FALLBACK_NATIVE_FEE: &str = "2000000"; // 0.02 RUNE

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThorchainYieldConfig {
    pub thornode_servers: Vec<String>,
    pub midgard_servers: Vec<String>,
}

pub struct ThorchainYieldAdapter {
    stake_policy_id: String,
    stake_asset: AssetRef,
    thornode_servers: Vec<String>,
    midgard_servers: Vec<String>,
    client: Client,
}

impl ThorchainYieldAdapter {
    pub fn new(policy: &PolicyConfig, config: &ThorchainYieldConfig) -> Result<Self> {
        if config.thornode_servers.is_empty() {
            return Err(StakeError::Config(format!(
                "policy {} has no thornode servers",
                policy.stake_policy_id
            )));
        }
        let stake_asset = policy
            .stake_assets
            .first()
            .cloned()
            .ok_or_else(|| StakeError::Config("policy has no stake asset".to_string()))?;
        Ok(Self {
            stake_policy_id: policy.stake_policy_id.clone(),
            stake_asset,
            thornode_servers: config.thornode_servers.clone(),
            midgard_servers: config.midgard_servers.clone(),
            client: Client::new(),
        })
    }

    fn check_asset(&self, asset: &AssetRef) -> Result<()> {
        if asset != &self.stake_asset {
            return Err(StakeError::AssetMismatch {
                plugin_id: asset.plugin_id.clone(),
                currency_code: asset.currency_code.clone(),
            });
        }
        Ok(())
    }

    async fn thornode(&self, path: &str) -> Result<Value> {
        fetch::waterfall_get(
            &self.client,
            &fetch::shuffled(&self.thornode_servers),
            path,
            fetch::FETCH_TIMEOUT,
        )
        .await
    }

    /// The chain's flat fee for a native deposit message.
    async fn native_fee(&self) -> Result<String> {
        let constants = self.thornode("/thorchain/constants").await?;
        Ok(constants
            .pointer("/int_64_values/NativeTransactionFee")
            .and_then(Value::as_i64)
            .map_or_else(|| FALLBACK_NATIVE_FEE.to_string(), |fee| fee.to_string()))
    }

    async fn provider_position(&self, address: &str) -> Result<Value> {
        self.thornode(&format!("/thorchain/rune_provider/{address}"))
            .await
    }

    fn deposit_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        memo: String,
        deposit_amount: &str,
        movement: QuoteAllocation,
        fee: String,
    ) -> ChangeQuote {
        let spend = SpendInfo {
            token_id: None,
            spend_targets: Vec::new(),
            other_params: Some(json!({
                "type": "deposit",
                "memo": memo,
                "amount": deposit_amount,
            })),
        };
        let allocations = vec![
            movement,
            QuoteAllocation::new(QuoteAllocationType::NetworkFee, &self.stake_asset, fee),
        ];
        let plan = SpendPlan {
            wallet,
            spends: vec![spend],
        };
        ChangeQuote::new(allocations, None, Box::new(plan))
    }
}

#[async_trait]
impl StakeAdapter for ThorchainYieldAdapter {
    fn stake_policy_id(&self) -> &str {
        &self.stake_policy_id
    }

    async fn fetch_stake_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        self.check_asset(asset)?;
        let balance = wallet.balance_of(None).unwrap_or_else(|| "0".to_string());
        if !amount::gte(&balance, native_amount)? {
            return Err(StakeError::InsufficientFunds {
                currency_code: asset.currency_code.clone(),
            });
        }

        let fee = self.native_fee().await?;
        if !amount::gte(&balance, &amount::add(native_amount, &fee)?)? {
            return Err(StakeError::InsufficientFunds {
                currency_code: asset.currency_code.clone(),
            });
        }

        Ok(self.deposit_quote(
            wallet,
            DEPOSIT_MEMO.to_string(),
            native_amount,
            QuoteAllocation::new(QuoteAllocationType::Stake, asset, native_amount),
            fee,
        ))
    }

    async fn fetch_unstake_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        self.check_asset(asset)?;
        let address = wallet.get_receive_address(None).await?.public_address;

        let position = self.provider_position(&address).await?;
        let redeemable = position
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or("0");
        if amount::is_zero(redeemable)? {
            return Err(StakeError::UnsupportedOperation(
                "no RUNEPool position to withdraw".to_string(),
            ));
        }

        let bps = amount::to_basis_points(native_amount, redeemable)?;
        let fee = self.native_fee().await?;
        Ok(self.deposit_quote(
            wallet,
            format!("pool-:{bps}"),
            "0",
            QuoteAllocation::new(QuoteAllocationType::Unstake, asset, native_amount),
            fee,
        ))
    }

    async fn fetch_unstake_exact_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        // Withdrawals are fraction-based; the closest basis point is as
        // exact as the protocol gets.
        self.fetch_unstake_quote(wallet, asset, native_amount).await
    }

    async fn fetch_claim_quote(
        &self,
        _wallet: Arc<dyn StakeWallet>,
        _asset: &AssetRef,
        _native_amount: &str,
    ) -> Result<ChangeQuote> {
        Err(StakeError::UnsupportedOperation(
            "RUNEPool withdrawals deliver principal and earnings together".to_string(),
        ))
    }

    async fn fetch_stake_position(&self, wallet: Arc<dyn StakeWallet>) -> Result<StakePosition> {
        let address = wallet.get_receive_address(None).await?.public_address;
        let position = self.provider_position(&address).await?;

        let staked = position
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or("0")
            .to_string();
        let pnl = position.get("pnl").and_then(Value::as_str).unwrap_or("0");

        let mut allocations = vec![PositionAllocation::new(
            PositionAllocationType::Staked,
            &self.stake_asset,
            &staked,
        )];
        // A losing position reports negative pnl; only gains are earnings.
        if !pnl.starts_with('-') && !amount::is_zero(pnl)? {
            allocations.push(PositionAllocation::new(
                PositionAllocationType::Earned,
                &self.stake_asset,
                pnl,
            ));
        }

        Ok(StakePosition {
            can_stake: true,
            can_unstake: !amount::is_zero(&staked)?,
            can_unstake_and_claim: false,
            can_claim: false,
            allocations,
        })
    }

    async fn fetch_yield_info(&self) -> Result<YieldInfo> {
        let body = fetch::waterfall_get(
            &self.client,
            &fetch::shuffled(&self.midgard_servers),
            "/v2/runepool",
            fetch::FETCH_TIMEOUT,
        )
        .await?;
        let apy = body
            .get("apy")
            .and_then(|value| match value {
                Value::Number(number) => number.as_f64(),
                Value::String(text) => text.parse().ok(),
                _ => None,
            })
            .map_or(0.0, |fraction| fraction * 100.0);
        Ok(YieldInfo {
            apy,
            yield_type: YieldType::Variable,
        })
    }
}
