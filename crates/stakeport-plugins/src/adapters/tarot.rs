//! Leveraged Velodrome LP vault on Tarot.
//!
//! Staking builds an LP position, posts it as collateral, then borrows
//! both sides against it to lever up. The steps form a fixed ordered
//! pipeline; the collateral-mint step cannot be sized until the
//! add-liquidity transaction confirms and reports the exact LP amount it
//! minted, so that value is threaded through its receipt.

use async_trait::async_trait;
use chrono::{Duration, Utc};
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

use super::evm::{self, EvmPlan, EvmRpc, LogExport, PlannedTx, SEL_APPROVE, TOPIC_TRANSFER};
use super::StakeAdapter;
use crate::policy::PolicyConfig;

const SEL_GET_RESERVES: &str = "0902f1ac"; // getReserves()
const SEL_TOTAL_SUPPLY: &str = "18160ddd"; // totalSupply()
const SEL_ADD_LIQUIDITY: &str = "5a47ddc3"; // addLiquidity(address,address,bool,uint256,uint256,uint256,uint256,address,uint256)
const SEL_MINT_COLLATERAL: &str = "40c10f19"; // mint(address,uint256)
const SEL_LEVERAGE: &str = "a7304bf8"; // leverage(address,uint256,uint256,uint256,uint256,address,uint256)
const SEL_DELEVERAGE: &str = "17d11a15"; // deleverage(address,uint256,uint256,uint256,uint256)
const SEL_EXCHANGE_RATE: &str = "3ba0b9a9"; // exchangeRate()

const WAD: &str = "1000000000000000000";
const DEFAULT_APPROVE_GAS: u64 = 60_000;
const DEFAULT_STEP_GAS: u64 = 400_000;
const DEADLINE_MINUTES: i64 = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TarotVelodromeConfig {
    pub rpc_urls: Vec<String>,
    pub token0_address: String,
    pub token1_address: String,
    pub lp_token_address: String,
    pub router_address: String,
    pub collateral_address: String,
    pub borrowable0_address: String,
    pub borrowable1_address: String,
    pub is_stable_pair: bool,
    /// Target leverage factor; 1 disables borrowing entirely.
    pub leverage: u64,
    pub apy_url: String,
    pub gas_multiplier: u64,
}

pub struct TarotVelodromeAdapter {
    stake_policy_id: String,
    assets: [AssetRef; 2],
    parent_asset: AssetRef,
    config: TarotVelodromeConfig,
    rpc: Arc<EvmRpc>,
    client: Client,
}

impl TarotVelodromeAdapter {
    pub fn new(policy: &PolicyConfig, config: &TarotVelodromeConfig) -> Result<Self> {
        let [asset0, asset1] = match policy.stake_assets.as_slice() {
            [asset0, asset1] => [asset0.clone(), asset1.clone()],
            _ => {
                return Err(StakeError::Config(format!(
                    "policy {} must stake exactly two assets",
                    policy.stake_policy_id
                )))
            }
        };
        if config.leverage == 0 {
            return Err(StakeError::Config("leverage must be at least 1".to_string()));
        }
        Ok(Self {
            stake_policy_id: policy.stake_policy_id.clone(),
            assets: [asset0, asset1],
            parent_asset: AssetRef::new(&policy.parent_plugin_id, &policy.parent_currency_code),
            config: config.clone(),
            rpc: Arc::new(EvmRpc::new(config.rpc_urls.clone(), config.gas_multiplier)?),
            client: Client::new(),
        })
    }

    /// Index of the requested asset within the pair.
    fn side_of(&self, asset: &AssetRef) -> Result<usize> {
        self.assets
            .iter()
            .position(|candidate| candidate == asset)
            .ok_or_else(|| StakeError::AssetMismatch {
                plugin_id: asset.plugin_id.clone(),
                currency_code: asset.currency_code.clone(),
            })
    }

    async fn reserves(&self) -> Result<(String, String)> {
        let raw = self
            .rpc
            .eth_call(&self.config.lp_token_address, SEL_GET_RESERVES)
            .await?;
        let words = evm::decode_words(&raw)?;
        if words.len() < 2 {
            return Err(StakeError::Api {
                status: 200,
                body: "malformed getReserves response".to_string(),
            });
        }
        Ok((words[0].clone(), words[1].clone()))
    }

    async fn lp_total_supply(&self) -> Result<String> {
        let word = self
            .rpc
            .eth_call(&self.config.lp_token_address, SEL_TOTAL_SUPPLY)
            .await?;
        evm::hex_to_decimal(&word)
    }

    /// Builds the full stake pipeline, gas not yet attached:
    /// Approve0 -> Approve1 -> AddLiquidity -> MintCollateral(receipt)
    /// -> ApproveBorrow0 -> ApproveBorrow1 -> Leverage.
    fn build_stake_steps(
        &self,
        address: &str,
        amounts: [&str; 2],
        needs_approval: [bool; 2],
        deadline: i64,
    ) -> Result<Vec<PlannedTx>> {
        let config = &self.config;
        let router_word = evm::encode_address(&config.router_address)?;
        let owner_word = evm::encode_address(address)?;
        let deadline_word = evm::encode_amount(&deadline.to_string())?;
        let mut steps = Vec::new();

        let tokens = [&config.token0_address, &config.token1_address];
        for side in 0..2 {
            if !needs_approval[side] {
                continue;
            }
            let calldata = evm::calldata(
                SEL_APPROVE,
                &[router_word.clone(), evm::encode_amount(amounts[side])?],
            );
            steps.push(PlannedTx::call(format!("approve{side}"), tokens[side], calldata));
        }

        let add_liquidity = evm::calldata(
            SEL_ADD_LIQUIDITY,
            &[
                evm::encode_address(&config.token0_address)?,
                evm::encode_address(&config.token1_address)?,
                evm::encode_amount(if config.is_stable_pair { "1" } else { "0" })?,
                evm::encode_amount(amounts[0])?,
                evm::encode_amount(amounts[1])?,
                evm::encode_amount("0")?,
                evm::encode_amount("0")?,
                owner_word.clone(),
                deadline_word.clone(),
            ],
        );
        steps.push(
            PlannedTx::call("add-liquidity", &config.router_address, add_liquidity).with_export(
                LogExport {
                    topic0: TOPIC_TRANSFER.to_string(),
                    word_index: 0,
                    name: "liquidity".to_string(),
                },
            ),
        );

        // The minted LP amount is only known once add-liquidity confirms.
        let mint_collateral = evm::calldata(
            SEL_MINT_COLLATERAL,
            &[owner_word.clone(), evm::encode_amount("0")?],
        );
        steps.push(
            PlannedTx::call("mint-collateral", &config.collateral_address, mint_collateral)
                .with_receipt_amount("liquidity"),
        );

        if config.leverage > 1 {
            let borrowables = [&config.borrowable0_address, &config.borrowable1_address];
            for side in 0..2 {
                let calldata = evm::calldata(
                    SEL_APPROVE,
                    &[router_word.clone(), evm::encode_max_amount()],
                );
                steps.push(PlannedTx::call(
                    format!("approve-borrow{side}"),
                    borrowables[side],
                    calldata,
                ));
            }

            let borrow_factor = config.leverage - 1;
            let leverage = evm::calldata(
                SEL_LEVERAGE,
                &[
                    evm::encode_address(&config.lp_token_address)?,
                    evm::encode_amount(&amount::mul(amounts[0], borrow_factor)?)?,
                    evm::encode_amount(&amount::mul(amounts[1], borrow_factor)?)?,
                    evm::encode_amount("0")?,
                    evm::encode_amount("0")?,
                    owner_word,
                    deadline_word,
                ],
            );
            steps.push(PlannedTx::call("leverage", &config.router_address, leverage));
        }

        Ok(steps)
    }

    async fn attach_gas(&self, address: &str, steps: Vec<PlannedTx>) -> Result<Vec<PlannedTx>> {
        let gas_price = self.rpc.gas_price().await?;
        let mut out = Vec::with_capacity(steps.len());
        for step in steps {
            let default_gas = if step.label.starts_with("approve") {
                DEFAULT_APPROVE_GAS
            } else {
                DEFAULT_STEP_GAS
            };
            let gas_limit = self
                .rpc
                .padded_gas_estimate(address, &step.to, &step.value, &step.calldata, default_gas)
                .await?;
            out.push(step.with_gas(gas_limit, gas_price.clone()));
        }
        Ok(out)
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
impl StakeAdapter for TarotVelodromeAdapter {
    fn stake_policy_id(&self) -> &str {
        &self.stake_policy_id
    }

    async fn fetch_stake_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        let side = self.side_of(asset)?;
        let other = 1 - side;

        let address = wallet.get_receive_address(None).await?.public_address;
        let (reserve0, reserve1) = self.reserves().await?;
        let reserves = [&reserve0, &reserve1];
        let other_amount = counterpart_amount(native_amount, reserves[side], reserves[other])?;

        let mut amounts = ["0".to_string(), "0".to_string()];
        amounts[side] = native_amount.to_string();
        amounts[other] = other_amount;

        // Both sides must be on hand before the position can be built.
        for index in 0..2 {
            let balance = wallet
                .balance_of(Some(&self.assets[index].currency_code))
                .unwrap_or_else(|| "0".to_string());
            if !amount::gte(&balance, &amounts[index])? {
                return Err(StakeError::InsufficientFunds {
                    currency_code: self.assets[index].currency_code.clone(),
                });
            }
        }

        let config = &self.config;
        let tokens = [&config.token0_address, &config.token1_address];
        let mut needs_approval = [false, false];
        for index in 0..2 {
            let allowance = self
                .rpc
                .erc20_allowance(tokens[index], &address, &config.router_address)
                .await?;
            needs_approval[index] = !amount::gte(&allowance, &amounts[index])?;
        }

        let deadline = (Utc::now() + Duration::minutes(DEADLINE_MINUTES)).timestamp();
        let steps = self.build_stake_steps(
            &address,
            [amounts[0].as_str(), amounts[1].as_str()],
            needs_approval,
            deadline,
        )?;
        let steps = self.attach_gas(&address, steps).await?;
        let fee = evm::total_fee(&steps)?;

        let allocations = vec![
            QuoteAllocation::new(QuoteAllocationType::Stake, &self.assets[0], &amounts[0]),
            QuoteAllocation::new(QuoteAllocationType::Stake, &self.assets[1], &amounts[1]),
            QuoteAllocation::new(QuoteAllocationType::NetworkFee, &self.parent_asset, fee),
        ];
        let plan = self.plan(wallet, address, steps);
        Ok(ChangeQuote::new(allocations, None, Box::new(plan)))
    }

    async fn fetch_unstake_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        let side = self.side_of(asset)?;
        let other = 1 - side;
        let address = wallet.get_receive_address(None).await?.public_address;

        let (reserve0, reserve1) = self.reserves().await?;
        let reserves = [&reserve0, &reserve1];
        let supply = self.lp_total_supply().await?;
        let lp_needed = amount::mul_div(native_amount, &supply, reserves[side])?;
        let other_amount = counterpart_amount(native_amount, reserves[side], reserves[other])?;

        let rate_word = self
            .rpc
            .eth_call(&self.config.collateral_address, SEL_EXCHANGE_RATE)
            .await?;
        let rate = evm::hex_to_decimal(&rate_word)?;
        let shares = amount::mul_div(&lp_needed, WAD, &rate)?;

        let deadline = (Utc::now() + Duration::minutes(DEADLINE_MINUTES)).timestamp();
        let approve = evm::calldata(
            SEL_APPROVE,
            &[
                evm::encode_address(&self.config.router_address)?,
                evm::encode_amount(&shares)?,
            ],
        );
        let deleverage = evm::calldata(
            SEL_DELEVERAGE,
            &[
                evm::encode_address(&self.config.lp_token_address)?,
                evm::encode_amount(&shares)?,
                evm::encode_amount("0")?,
                evm::encode_amount("0")?,
                evm::encode_amount(&deadline.to_string())?,
            ],
        );
        let steps = vec![
            PlannedTx::call("approve-collateral", &self.config.collateral_address, approve),
            PlannedTx::call("deleverage", &self.config.router_address, deleverage),
        ];
        let steps = self.attach_gas(&address, steps).await?;
        let fee = evm::total_fee(&steps)?;

        let mut unstaked = ["0".to_string(), "0".to_string()];
        unstaked[side] = native_amount.to_string();
        unstaked[other] = other_amount;
        let allocations = vec![
            QuoteAllocation::new(QuoteAllocationType::Unstake, &self.assets[0], &unstaked[0]),
            QuoteAllocation::new(QuoteAllocationType::Unstake, &self.assets[1], &unstaked[1]),
            QuoteAllocation::new(QuoteAllocationType::NetworkFee, &self.parent_asset, fee),
        ];
        let plan = self.plan(wallet, address, steps);
        Ok(ChangeQuote::new(allocations, None, Box::new(plan)))
    }

    async fn fetch_unstake_exact_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        self.fetch_unstake_quote(wallet, asset, native_amount).await
    }

    async fn fetch_claim_quote(
        &self,
        _wallet: Arc<dyn StakeWallet>,
        _asset: &AssetRef,
        _native_amount: &str,
    ) -> Result<ChangeQuote> {
        Err(StakeError::UnsupportedOperation(
            "vault earnings auto-compound into the position".to_string(),
        ))
    }

    async fn fetch_stake_position(&self, wallet: Arc<dyn StakeWallet>) -> Result<StakePosition> {
        let address = wallet.get_receive_address(None).await?.public_address;

        let (shares, rate_word, supply, (reserve0, reserve1)) = tokio::try_join!(
            self.rpc
                .erc20_balance(&self.config.collateral_address, &address),
            self.rpc
                .eth_call(&self.config.collateral_address, SEL_EXCHANGE_RATE),
            self.lp_total_supply(),
            self.reserves(),
        )?;
        let rate = evm::hex_to_decimal(&rate_word)?;
        let lp = amount::mul_div(&shares, &rate, WAD)?;
        let amount0 = amount::mul_div(&lp, &reserve0, &supply)?;
        let amount1 = amount::mul_div(&lp, &reserve1, &supply)?;

        let has_stake = !amount::is_zero(&lp)?;
        Ok(StakePosition {
            allocations: vec![
                PositionAllocation::new(PositionAllocationType::Staked, &self.assets[0], amount0),
                PositionAllocation::new(PositionAllocationType::Staked, &self.assets[1], amount1),
            ],
            can_stake: true,
            can_unstake: has_stake,
            can_unstake_and_claim: false,
            can_claim: false,
        })
    }

    async fn fetch_yield_info(&self) -> Result<YieldInfo> {
        let response = self.client.get(&self.config.apy_url).send().await?;
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

/// The matching amount of the pair's other token at current reserves.
fn counterpart_amount(amount_in: &str, reserve_this: &str, reserve_other: &str) -> Result<String> {
    amount::mul_div(amount_in, reserve_other, reserve_this)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakeport_common::types::{PolicyFlags, StakeProviderInfo, StakeWarnings};

    fn test_adapter() -> TarotVelodromeAdapter {
        let config = TarotVelodromeConfig {
            rpc_urls: vec!["https://rpc.invalid".to_string()],
            token0_address: "0x7f5c764cbc14f9669b88837ca1490cca17c31607".to_string(),
            token1_address: "0x8c6f28f2f1a3c87f0f938b96d27520d9751ec8d9".to_string(),
            lp_token_address: "0xd16232ad60188b68076a235c65d692090caba155".to_string(),
            router_address: "0x6ba30c00bdec566a05a2cb1c7c8c5c1c2e4f13f7".to_string(),
            collateral_address: "0x4d1b76a0a47ed94b7aabeaced5e360a9b0286053".to_string(),
            borrowable0_address: "0xf78daa2a1b8488d9a42c81b23d426b6a9b1a607e".to_string(),
            borrowable1_address: "0x1a3e164f2e9b4a9a92d6a96ca3e1c2e3f50d66a8".to_string(),
            is_stable_pair: true,
            leverage: 2,
            apy_url: "https://api.invalid/apy".to_string(),
            gas_multiplier: 2,
        };
        let policy = PolicyConfig {
            stake_policy_id: "optimism-tarot-usdc-susd".to_string(),
            parent_plugin_id: "optimism".to_string(),
            parent_currency_code: "ETH".to_string(),
            stake_provider_info: StakeProviderInfo {
                display_name: "Tarot USDC/sUSD".to_string(),
                plugin_id: "optimism".to_string(),
                stake_provider_id: "tarot".to_string(),
            },
            adapter_config: crate::adapters::AdapterConfig::TarotVelodromePool(config.clone()),
            stake_assets: vec![
                AssetRef::new("optimism", "USDC"),
                AssetRef::new("optimism", "SUSD"),
            ],
            reward_assets: vec![
                AssetRef::new("optimism", "USDC"),
                AssetRef::new("optimism", "SUSD"),
            ],
            flags: PolicyFlags::default(),
            warnings: StakeWarnings::default(),
        };
        TarotVelodromeAdapter::new(&policy, &config).unwrap()
    }

    #[test]
    fn test_counterpart_tracks_reserve_ratio() {
        assert_eq!(counterpart_amount("1000", "2000", "4000").unwrap(), "2000");
        assert_eq!(counterpart_amount("1000", "4000", "2000").unwrap(), "500");
    }

    #[test]
    fn test_stake_pipeline_order_and_receipt_dependency() {
        let adapter = test_adapter();
        let address = "0x36c2b1f9d7e0a1b33d5798dbcf42de290f11dd18";
        let steps = adapter
            .build_stake_steps(address, ["1000", "2000"], [true, true], 1_900_000_000)
            .unwrap();
        let labels: Vec<&str> = steps.iter().map(|step| step.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "approve0",
                "approve1",
                "add-liquidity",
                "mint-collateral",
                "approve-borrow0",
                "approve-borrow1",
                "leverage",
            ]
        );

        let add_liquidity = &steps[2];
        assert_eq!(add_liquidity.export.as_ref().unwrap().name, "liquidity");
        let mint = &steps[3];
        assert_eq!(mint.amount_from_receipt.as_deref(), Some("liquidity"));
    }

    #[test]
    fn test_satisfied_allowances_skip_approvals() {
        let adapter = test_adapter();
        let address = "0x36c2b1f9d7e0a1b33d5798dbcf42de290f11dd18";
        let steps = adapter
            .build_stake_steps(address, ["1000", "2000"], [false, false], 1_900_000_000)
            .unwrap();
        assert_eq!(steps[0].label, "add-liquidity");
    }

    #[test]
    fn test_unleveraged_pool_stops_at_collateral() {
        let mut adapter = test_adapter();
        adapter.config.leverage = 1;
        let address = "0x36c2b1f9d7e0a1b33d5798dbcf42de290f11dd18";
        let steps = adapter
            .build_stake_steps(address, ["1000", "2000"], [false, false], 1_900_000_000)
            .unwrap();
        assert_eq!(steps.last().unwrap().label, "mint-collateral");
    }
}
