//! Coreum delegated staking through the StakeKit aggregator.
//!
//! StakeKit models every operation as an action session containing one or
//! more transactions. Each transaction is constructed server-side, signed
//! by the wallet as an opaque message, and submitted back in order.

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use stakeport_common::errors::{Result, StakeError};
use stakeport_common::types::{
    ApprovePlan, AssetRef, ChangeQuote, PositionAllocation, PositionAllocationType,
    QuoteAllocation, QuoteAllocationType, StakePosition, YieldInfo, YieldType,
};
use stakeport_common::utils::{amount, fetch};
use stakeport_common::wallet::StakeWallet;

use super::StakeAdapter;
use crate::policy::PolicyConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeKitConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub integration_id: String,
    pub validator_address: String,
    /// Decimal places of the staked asset; StakeKit speaks display units.
    pub decimals: u32,
}

struct StakeKitClient {
    client: Client,
    api_url: String,
    api_key: String,
}

impl StakeKitClient {
    async fn request(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{path}", self.api_url);
        let mut request = self
            .client
            .request(method, url)
            .header("X-API-KEY", &self.api_key);
        if let Some(body) = body {
            request = request.json(&body);
        }
        fetch::take_json(request.send().await?).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.request(reqwest::Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.request(reqwest::Method::POST, path, Some(body)).await
    }

    async fn patch(&self, path: &str, body: Value) -> Result<Value> {
        self.request(reqwest::Method::PATCH, path, Some(body)).await
    }
}

pub struct StakeKitAdapter {
    stake_policy_id: String,
    stake_asset: AssetRef,
    integration_id: String,
    validator_address: String,
    decimals: u32,
    api: Arc<StakeKitClient>,
}

impl StakeKitAdapter {
    pub fn new(policy: &PolicyConfig, config: &StakeKitConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            StakeError::Config(format!(
                "policy {} requires a StakeKit API key",
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
            integration_id: config.integration_id.clone(),
            validator_address: config.validator_address.clone(),
            decimals: config.decimals,
            api: Arc::new(StakeKitClient {
                client: Client::new(),
                api_url: config.api_url.trim_end_matches('/').to_string(),
                api_key,
            }),
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

    /// Turns an action response into a quote: the session's transactions
    /// become the plan, their gas estimates the network fee.
    fn quote_from_action(
        &self,
        wallet: Arc<dyn StakeWallet>,
        action: &Value,
        movement: QuoteAllocation,
    ) -> Result<ChangeQuote> {
        let transactions = action
            .get("transactions")
            .and_then(Value::as_array)
            .ok_or_else(|| StakeError::Api {
                status: 200,
                body: "action response carried no transactions".to_string(),
            })?;
        if transactions.is_empty() {
            return Err(StakeError::Api {
                status: 200,
                body: "action response carried an empty transaction list".to_string(),
            });
        }

        let mut fee = "0".to_string();
        let mut tx_ids = Vec::with_capacity(transactions.len());
        for tx in transactions {
            let id = tx
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| StakeError::Api {
                    status: 200,
                    body: "action transaction is missing an id".to_string(),
                })?;
            tx_ids.push(id.to_string());
            if let Some(gas) = tx.pointer("/gasEstimate/amount").and_then(Value::as_str) {
                fee = amount::add(&fee, &to_native(gas, self.decimals)?)?;
            }
        }

        let allocations = vec![
            movement,
            QuoteAllocation::new(QuoteAllocationType::NetworkFee, &self.stake_asset, fee),
        ];
        let plan = StakeKitPlan {
            api: self.api.clone(),
            wallet,
            tx_ids,
        };
        Ok(ChangeQuote::new(allocations, None, Box::new(plan)))
    }

    async fn open_action(&self, kind: &str, address: &str, native_amount: &str) -> Result<Value> {
        self.api
            .post(
                &format!("/v1/actions/{kind}"),
                json!({
                    "integrationId": self.integration_id,
                    "addresses": { "address": address },
                    "args": {
                        "amount": to_display(native_amount, self.decimals)?,
                        "validatorAddress": self.validator_address,
                    },
                }),
            )
            .await
    }

    async fn balances(&self, address: &str) -> Result<Vec<Value>> {
        let body = self
            .api
            .post(
                &format!("/v1/yields/{}/balances", self.integration_id),
                json!({ "addresses": { "address": address } }),
            )
            .await?;
        Ok(body.as_array().cloned().unwrap_or_default())
    }
}

#[async_trait]
impl StakeAdapter for StakeKitAdapter {
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
        let action = self.open_action("enter", &address, native_amount).await?;
        self.quote_from_action(
            wallet,
            &action,
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
        let action = self.open_action("exit", &address, native_amount).await?;
        self.quote_from_action(
            wallet,
            &action,
            QuoteAllocation::new(QuoteAllocationType::Unstake, asset, native_amount),
        )
    }

    async fn fetch_unstake_exact_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        // Undelegation amounts are exact already.
        self.fetch_unstake_quote(wallet, asset, native_amount).await
    }

    async fn fetch_claim_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        self.check_asset(asset)?;
        let address = wallet.get_receive_address(None).await?.public_address;

        // Claims ride on the pending action the aggregator attached to the
        // rewards balance.
        let balances = self.balances(&address).await?;
        let pending = balances
            .iter()
            .filter(|entry| entry.get("type").and_then(Value::as_str) == Some("rewards"))
            .flat_map(|entry| {
                entry
                    .get("pendingActions")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
            })
            .find(|action| action.get("type").and_then(Value::as_str) == Some("CLAIM_REWARDS"))
            .ok_or_else(|| {
                StakeError::UnsupportedOperation("no claimable rewards are pending".to_string())
            })?;

        let action = self
            .api
            .post(
                "/v1/actions/pending",
                json!({
                    "integrationId": self.integration_id,
                    "type": "CLAIM_REWARDS",
                    "passthrough": pending.get("passthrough").cloned().unwrap_or(Value::Null),
                }),
            )
            .await?;
        self.quote_from_action(
            wallet,
            &action,
            QuoteAllocation::new(QuoteAllocationType::Claim, asset, native_amount),
        )
    }

    async fn fetch_stake_position(&self, wallet: Arc<dyn StakeWallet>) -> Result<StakePosition> {
        let address = wallet.get_receive_address(None).await?.public_address;
        let balances = self.balances(&address).await?;

        let mut allocations = Vec::new();
        let mut can_unstake = false;
        let mut can_claim = false;
        for entry in &balances {
            let kind = entry.get("type").and_then(Value::as_str).unwrap_or("");
            let display = entry.get("amount").and_then(Value::as_str).unwrap_or("0");
            let native = to_native(display, self.decimals)?;
            match kind {
                "staked" => {
                    can_unstake = can_unstake || !amount::is_zero(&native)?;
                    allocations.push(PositionAllocation::new(
                        PositionAllocationType::Staked,
                        &self.stake_asset,
                        native,
                    ));
                }
                "rewards" => {
                    can_claim = can_claim || !amount::is_zero(&native)?;
                    allocations.push(PositionAllocation::new(
                        PositionAllocationType::Earned,
                        &self.stake_asset,
                        native,
                    ));
                }
                "unstaking" => {
                    let mut allocation = PositionAllocation::new(
                        PositionAllocationType::Unstaked,
                        &self.stake_asset,
                        native,
                    );
                    if let Some(date) = entry.get("date").and_then(Value::as_str) {
                        if let Ok(when) = DateTime::parse_from_rfc3339(date) {
                            allocation = allocation.with_locktime(when.to_utc());
                        }
                    }
                    allocations.push(allocation);
                }
                "unstaked" => {
                    can_claim = can_claim || !amount::is_zero(&native)?;
                    allocations.push(PositionAllocation::new(
                        PositionAllocationType::Unstaked,
                        &self.stake_asset,
                        native,
                    ));
                }
                _ => {}
            }
        }

        Ok(StakePosition {
            allocations,
            can_stake: true,
            can_unstake,
            can_unstake_and_claim: false,
            can_claim,
        })
    }

    async fn fetch_yield_info(&self) -> Result<YieldInfo> {
        let body = self
            .api
            .get(&format!("/v1/yields/{}", self.integration_id))
            .await?;
        let apy = body
            .get("apy")
            .and_then(Value::as_f64)
            .map_or(0.0, |fraction| fraction * 100.0);
        Ok(YieldInfo {
            apy,
            yield_type: YieldType::Variable,
        })
    }
}

/// Signs and submits the session's transactions strictly in order; the
/// aggregator sequences the on-chain account numbers behind each submit.
struct StakeKitPlan {
    api: Arc<StakeKitClient>,
    wallet: Arc<dyn StakeWallet>,
    tx_ids: Vec<String>,
}

#[async_trait]
impl ApprovePlan for StakeKitPlan {
    async fn execute(&self) -> Result<()> {
        for id in &self.tx_ids {
            let constructed = self
                .api
                .patch(&format!("/v1/transactions/{id}"), json!({}))
                .await?;
            let unsigned = constructed
                .get("unsignedTransaction")
                .and_then(Value::as_str)
                .ok_or_else(|| StakeError::Api {
                    status: 200,
                    body: format!("transaction {id} was constructed without a payload"),
                })?;
            let signed = self.wallet.sign_message(unsigned).await?;
            self.api
                .post(
                    &format!("/v1/transactions/{id}/submit"),
                    json!({ "signedTransaction": signed }),
                )
                .await?;
        }
        Ok(())
    }
}

/// `"12.5"` display units -> `"12500000"` native units (6 decimals).
fn to_native(display: &str, decimals: u32) -> Result<String> {
    let trimmed = display.trim();
    let (integer, fraction) = match trimmed.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (trimmed, ""),
    };
    if fraction.len() > decimals as usize {
        return Err(StakeError::Amount(format!(
            "{display} has more than {decimals} decimal places"
        )));
    }
    let integer = if integer.is_empty() { "0" } else { integer };
    let padded = format!("{fraction:0<width$}", width = decimals as usize);
    let scale = format!("1{}", "0".repeat(decimals as usize));
    let scaled = amount::mul_div(integer, &scale, "1")?;
    let fraction_value = if padded.is_empty() {
        "0".to_string()
    } else {
        padded
    };
    amount::add(&scaled, &fraction_value)
}

/// `"12500000"` native units -> `"12.5"` display units (6 decimals).
fn to_display(native: &str, decimals: u32) -> Result<String> {
    let value = amount::parse(native)?.to_string();
    let width = decimals as usize;
    let padded = format!("{value:0>pad$}", pad = width + 1);
    let (integer, fraction) = padded.split_at(padded.len() - width);
    let fraction = fraction.trim_end_matches('0');
    Ok(if fraction.is_empty() {
        integer.to_string()
    } else {
        format!("{integer}.{fraction}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_native() {
        assert_eq!(to_native("12.5", 6).unwrap(), "12500000");
        assert_eq!(to_native("0.000001", 6).unwrap(), "1");
        assert_eq!(to_native("42", 6).unwrap(), "42000000");
        assert_eq!(to_native(".5", 6).unwrap(), "500000");
        assert!(to_native("1.0000001", 6).is_err());
    }

    #[test]
    fn test_to_display() {
        assert_eq!(to_display("12500000", 6).unwrap(), "12.5");
        assert_eq!(to_display("1", 6).unwrap(), "0.000001");
        assert_eq!(to_display("42000000", 6).unwrap(), "42");
        assert_eq!(to_display("0", 6).unwrap(), "0");
    }

    #[test]
    fn test_unit_round_trip() {
        for native in ["1", "999999", "1000000", "123456789"] {
            let display = to_display(native, 6).unwrap();
            assert_eq!(to_native(&display, 6).unwrap(), native);
        }
    }
}
