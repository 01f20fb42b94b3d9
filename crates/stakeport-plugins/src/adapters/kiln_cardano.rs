//! Cardano pooled staking through the Kiln REST API.
//!
//! Kiln builds the delegation and withdrawal transactions server-side; the
//! wallet signs and broadcasts them. Delegation is account-wide, so
//! unstaking always releases the whole position.

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

const FALLBACK_TX_FEE: &str = "200000"; // lovelace

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KilnCardanoConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub account_id: Option<String>,
    /// Bech32 pool id the policy delegates to.
    pub pool_id: String,
}

pub struct KilnCardanoAdapter {
    stake_policy_id: String,
    stake_asset: AssetRef,
    api_url: String,
    api_key: String,
    account_id: String,
    pool_id: String,
    client: Client,
}

impl KilnCardanoAdapter {
    pub fn new(policy: &PolicyConfig, config: &KilnCardanoConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            StakeError::Config(format!(
                "policy {} requires a Kiln API key",
                policy.stake_policy_id
            ))
        })?;
        let account_id = config.account_id.clone().ok_or_else(|| {
            StakeError::Config(format!(
                "policy {} requires a Kiln account id",
                policy.stake_policy_id
            ))
        })?;
        let stake_asset = policy
            .stake_assets
            .first()
            .cloned()
            .ok_or_else(|| StakeError::Config("policy has no stake asset".to_string()))?;
        Ok(Self {
            stake_policy_id: policy.stake_policy_id.clone(),
            stake_asset,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            account_id,
            pool_id: config.pool_id.clone(),
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

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}{path}", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        fetch::take_json(response).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}{path}", self.api_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        fetch::take_json(response).await
    }

    /// Wraps a server-built transaction into a quote with the given
    /// movement allocation.
    fn quote_from_built_tx(
        &self,
        wallet: Arc<dyn StakeWallet>,
        built: &Value,
        movement: QuoteAllocation,
    ) -> Result<ChangeQuote> {
        let unsigned = built
            .pointer("/data/unsigned_tx_serialized")
            .and_then(Value::as_str)
            .ok_or_else(|| StakeError::Api {
                status: 200,
                body: "transaction endpoint returned no unsigned transaction".to_string(),
            })?;
        let fee = built
            .pointer("/data/fee")
            .and_then(Value::as_str)
            .unwrap_or(FALLBACK_TX_FEE)
            .to_string();

        let spend = SpendInfo {
            token_id: None,
            spend_targets: Vec::new(),
            other_params: Some(json!({ "unsignedTx": unsigned })),
        };
        let allocations = vec![
            movement,
            QuoteAllocation::new(QuoteAllocationType::NetworkFee, &self.stake_asset, fee),
        ];
        let plan = SpendPlan {
            wallet,
            spends: vec![spend],
        };
        Ok(ChangeQuote::new(allocations, None, Box::new(plan)))
    }
}

#[async_trait]
impl StakeAdapter for KilnCardanoAdapter {
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

        let address = wallet.get_receive_address(None).await?.public_address;
        let built = self
            .post(
                "/v1/ada/transaction/stake",
                json!({
                    "account_id": self.account_id,
                    "wallet": address,
                    "pool_id": self.pool_id,
                }),
            )
            .await?;
        self.quote_from_built_tx(
            wallet,
            &built,
            QuoteAllocation::new(QuoteAllocationType::Stake, asset, native_amount),
        )
    }

    async fn fetch_unstake_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        self.check_asset(asset)?;
        let address = wallet.get_receive_address(None).await?.public_address;
        // Undelegation is all-or-nothing; the requested amount only labels
        // the quote for display.
        let built = self
            .post(
                "/v1/ada/transaction/unstake",
                json!({
                    "account_id": self.account_id,
                    "wallet": address,
                }),
            )
            .await?;
        self.quote_from_built_tx(
            wallet,
            &built,
            QuoteAllocation::new(QuoteAllocationType::Unstake, asset, native_amount),
        )
    }

    async fn fetch_unstake_exact_quote(
        &self,
        _wallet: Arc<dyn StakeWallet>,
        _asset: &AssetRef,
        _native_amount: &str,
    ) -> Result<ChangeQuote> {
        Err(StakeError::UnsupportedOperation(
            "Cardano undelegation cannot be sized; it always releases the whole stake".to_string(),
        ))
    }

    async fn fetch_claim_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        self.check_asset(asset)?;
        let address = wallet.get_receive_address(None).await?.public_address;
        let built = self
            .post(
                "/v1/ada/transaction/withdraw-rewards",
                json!({
                    "account_id": self.account_id,
                    "wallet": address,
                    "amount_lovelace": native_amount,
                }),
            )
            .await?;
        self.quote_from_built_tx(
            wallet,
            &built,
            QuoteAllocation::new(QuoteAllocationType::Claim, asset, native_amount),
        )
    }

    async fn fetch_stake_position(&self, wallet: Arc<dyn StakeWallet>) -> Result<StakePosition> {
        let address = wallet.get_receive_address(None).await?.public_address;
        let body = self
            .get(&format!("/v1/ada/stakes?wallets={address}"))
            .await?;
        let entry = body
            .pointer("/data/0")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let staked = entry
            .get("balance")
            .and_then(Value::as_str)
            .unwrap_or("0")
            .to_string();
        let rewards = entry
            .get("rewards")
            .and_then(Value::as_str)
            .unwrap_or("0")
            .to_string();
        let active = entry.get("state").and_then(Value::as_str) == Some("active");

        let can_claim = !amount::is_zero(&rewards)?;
        let mut allocations = vec![PositionAllocation::new(
            PositionAllocationType::Staked,
            &self.stake_asset,
            staked,
        )];
        if can_claim {
            allocations.push(PositionAllocation::new(
                PositionAllocationType::Earned,
                &self.stake_asset,
                rewards,
            ));
        }

        Ok(StakePosition {
            allocations,
            can_stake: true,
            can_unstake: active,
            can_unstake_and_claim: false,
            can_claim,
        })
    }

    async fn fetch_yield_info(&self) -> Result<YieldInfo> {
        let body = self.get("/v1/ada/network-stats").await?;
        let apy = body
            .pointer("/data/network_gross_apy")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        Ok(YieldInfo {
            apy,
            yield_type: YieldType::Variable,
        })
    }
}
