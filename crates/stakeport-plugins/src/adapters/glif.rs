//! Filecoin staking through the Glif Infinity Pool (FEVM).
//!
//! Deposits mint iFIL against the pool; withdrawals burn iFIL back into
//! FIL at the current share price. The position is fully liquid, so there
//! is no claim flow.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use stakeport_common::errors::{Result, StakeError};
use stakeport_common::types::{
    AssetRef, ChangeQuote, PositionAllocation, PositionAllocationType, QuoteAllocation,
    QuoteAllocationType, StakePosition, YieldInfo, YieldType,
};
use stakeport_common::utils::amount;
use stakeport_common::wallet::StakeWallet;

use super::evm::{self, EvmPlan, EvmRpc, PlannedTx, SEL_APPROVE};
use super::StakeAdapter;
use crate::policy::PolicyConfig;

const SEL_DEPOSIT: &str = "f340fa01"; // deposit(address)
const SEL_WITHDRAW: &str = "b460af94"; // withdraw(uint256,address,address)
const SEL_CONVERT_TO_ASSETS: &str = "07a2d13a"; // convertToAssets(uint256)
const SEL_CONVERT_TO_SHARES: &str = "c6e6f592"; // convertToShares(uint256)

const DEFAULT_DEPOSIT_GAS: u64 = 45_000_000;
const DEFAULT_WITHDRAW_GAS: u64 = 60_000_000;
const DEFAULT_APPROVE_GAS: u64 = 15_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlifInfinityPoolConfig {
    pub rpc_urls: Vec<String>,
    pub pool_address: String,
    pub ifil_token_address: String,
    pub metrics_url: String,
    pub gas_multiplier: u64,
}

pub struct GlifInfinityPoolAdapter {
    stake_policy_id: String,
    stake_asset: AssetRef,
    parent_asset: AssetRef,
    pool: String,
    ifil: String,
    metrics_url: String,
    rpc: Arc<EvmRpc>,
    client: Client,
}

impl GlifInfinityPoolAdapter {
    pub fn new(policy: &PolicyConfig, config: &GlifInfinityPoolConfig) -> Result<Self> {
        let stake_asset = policy
            .stake_assets
            .first()
            .cloned()
            .ok_or_else(|| StakeError::Config("policy has no stake asset".to_string()))?;
        Ok(Self {
            stake_policy_id: policy.stake_policy_id.clone(),
            stake_asset,
            parent_asset: AssetRef::new(&policy.parent_plugin_id, &policy.parent_currency_code),
            pool: config.pool_address.clone(),
            ifil: config.ifil_token_address.clone(),
            metrics_url: config.metrics_url.clone(),
            rpc: Arc::new(EvmRpc::new(config.rpc_urls.clone(), config.gas_multiplier)?),
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

    async fn convert(&self, selector: &str, value: &str) -> Result<String> {
        let calldata = evm::calldata(selector, &[evm::encode_amount(value)?]);
        let word = self.rpc.eth_call(&self.pool, &calldata).await?;
        evm::hex_to_decimal(&word)
    }

    fn plan(
        &self,
        wallet: Arc<dyn StakeWallet>,
        signer_address: String,
        txs: Vec<PlannedTx>,
    ) -> EvmPlan {
        EvmPlan {
            rpc: self.rpc.clone(),
            wallet,
            signer_address,
            token_id: None,
            txs,
        }
    }
}

#[async_trait]
impl StakeAdapter for GlifInfinityPoolAdapter {
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
        let calldata = evm::calldata(SEL_DEPOSIT, &[evm::encode_address(&address)?]);
        let gas_price = self.rpc.gas_price().await?;
        let gas_limit = self
            .rpc
            .padded_gas_estimate(&address, &self.pool, native_amount, &calldata, DEFAULT_DEPOSIT_GAS)
            .await?;
        let tx = PlannedTx::call("deposit", &self.pool, calldata)
            .with_value(native_amount)
            .with_gas(gas_limit, gas_price);
        let fee = tx.fee()?;

        if !amount::gte(&balance, &amount::add(native_amount, &fee)?)? {
            return Err(StakeError::InsufficientFunds {
                currency_code: asset.currency_code.clone(),
            });
        }

        let allocations = vec![
            QuoteAllocation::new(QuoteAllocationType::Stake, asset, native_amount),
            QuoteAllocation::new(QuoteAllocationType::NetworkFee, &self.parent_asset, fee),
        ];
        let plan = self.plan(wallet, address, vec![tx]);
        Ok(ChangeQuote::new(allocations, None, Box::new(plan)))
    }

    async fn fetch_unstake_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        self.check_asset(asset)?;
        let address = wallet.get_receive_address(None).await?.public_address;
        let gas_price = self.rpc.gas_price().await?;
        let mut txs = Vec::new();

        // The pool burns iFIL from the caller, which needs an allowance.
        let shares = self.convert(SEL_CONVERT_TO_SHARES, native_amount).await?;
        let allowance = self.rpc.erc20_allowance(&self.ifil, &address, &self.pool).await?;
        if !amount::gte(&allowance, &shares)? {
            let approve_data = evm::calldata(
                SEL_APPROVE,
                &[evm::encode_address(&self.pool)?, evm::encode_max_amount()],
            );
            let gas_limit = self
                .rpc
                .padded_gas_estimate(&address, &self.ifil, "0", &approve_data, DEFAULT_APPROVE_GAS)
                .await?;
            txs.push(
                PlannedTx::call("approve-ifil", &self.ifil, approve_data)
                    .with_gas(gas_limit, gas_price.clone()),
            );
        }

        let withdraw_data = evm::calldata(
            SEL_WITHDRAW,
            &[
                evm::encode_amount(native_amount)?,
                evm::encode_address(&address)?,
                evm::encode_address(&address)?,
            ],
        );
        let gas_limit = self
            .rpc
            .padded_gas_estimate(&address, &self.pool, "0", &withdraw_data, DEFAULT_WITHDRAW_GAS)
            .await?;
        txs.push(
            PlannedTx::call("withdraw", &self.pool, withdraw_data).with_gas(gas_limit, gas_price),
        );

        let fee = evm::total_fee(&txs)?;
        let allocations = vec![
            QuoteAllocation::new(QuoteAllocationType::Unstake, asset, native_amount),
            QuoteAllocation::new(QuoteAllocationType::NetworkFee, &self.parent_asset, fee),
        ];
        let plan = self.plan(wallet, address, txs);
        Ok(ChangeQuote::new(allocations, None, Box::new(plan)))
    }

    async fn fetch_unstake_exact_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        // Withdrawals are already sized in exact FIL out.
        self.fetch_unstake_quote(wallet, asset, native_amount).await
    }

    async fn fetch_claim_quote(
        &self,
        _wallet: Arc<dyn StakeWallet>,
        _asset: &AssetRef,
        _native_amount: &str,
    ) -> Result<ChangeQuote> {
        Err(StakeError::UnsupportedOperation(
            "the Infinity Pool is fully liquid; withdraw instead of claiming".to_string(),
        ))
    }

    async fn fetch_stake_position(&self, wallet: Arc<dyn StakeWallet>) -> Result<StakePosition> {
        let address = wallet.get_receive_address(None).await?.public_address;
        let shares = self.rpc.erc20_balance(&self.ifil, &address).await?;
        let staked = self.convert(SEL_CONVERT_TO_ASSETS, &shares).await?;

        let has_stake = !amount::is_zero(&staked)?;
        Ok(StakePosition {
            allocations: vec![PositionAllocation::new(
                PositionAllocationType::Staked,
                &self.stake_asset,
                staked,
            )],
            can_stake: true,
            can_unstake: has_stake,
            can_unstake_and_claim: false,
            can_claim: false,
        })
    }

    async fn fetch_yield_info(&self) -> Result<YieldInfo> {
        let response = self.client.get(&self.metrics_url).send().await?;
        let body = stakeport_common::utils::fetch::take_json(response).await?;
        let apy = body
            .get("apy")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);
        Ok(YieldInfo {
            apy,
            yield_type: YieldType::Variable,
        })
    }
}
