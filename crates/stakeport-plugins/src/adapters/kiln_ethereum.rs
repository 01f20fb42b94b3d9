//! Ethereum pooled liquid staking through a Kiln on-chain v2 pool.
//!
//! Staking deposits ETH into the pool contract for shares; unstaking files
//! an exit request whose ticket waits in an exit queue until the protocol
//! can fulfill it; claiming sweeps fulfillable tickets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
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

use super::evm::{self, EvmPlan, EvmRpc, PlannedTx};
use super::StakeAdapter;
use crate::policy::PolicyConfig;

const SEL_STAKE: &str = "3a4b66f1"; // stake()
const SEL_REQUEST_EXIT: &str = "721c6513"; // requestExit(uint256)
const SEL_CLAIM: &str = "379607f5"; // claim(uint256)
const SEL_RATE: &str = "2c4e722e"; // rate()
const SEL_TICKET_COUNT: &str = "1d3a8a4e"; // ticketCount(address)
const SEL_TICKET_AT: &str = "f2540a0b"; // ticketAt(address,uint256)

const WAD: &str = "1000000000000000000";
const DEFAULT_STAKE_GAS: u64 = 200_000;
const DEFAULT_EXIT_GAS: u64 = 250_000;
const DEFAULT_CLAIM_GAS: u64 = 150_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KilnEthereumConfig {
    pub rpc_urls: Vec<String>,
    pub pool_contract_address: String,
    pub exit_queue_address: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub gas_multiplier: u64,
}

pub struct KilnEthereumAdapter {
    stake_policy_id: String,
    stake_asset: AssetRef,
    parent_asset: AssetRef,
    pool: String,
    exit_queue: String,
    api_url: String,
    api_key: String,
    rpc: Arc<EvmRpc>,
    client: Client,
}

/// One pending exit-queue entry.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExitTicket {
    pub amount: String,
    pub unlock_time: i64,
    pub fulfillable: bool,
}

impl KilnEthereumAdapter {
    pub fn new(policy: &PolicyConfig, config: &KilnEthereumConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            StakeError::Config(format!(
                "policy {} requires a Kiln API key",
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
            parent_asset: AssetRef::new(&policy.parent_plugin_id, &policy.parent_currency_code),
            pool: config.pool_contract_address.clone(),
            exit_queue: config.exit_queue_address.clone(),
            api_url: config.api_url.clone(),
            api_key,
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

    async fn share_rate(&self) -> Result<String> {
        let word = self.rpc.eth_call(&self.pool, SEL_RATE).await?;
        evm::hex_to_decimal(&word)
    }

    async fn exit_tickets(&self, owner: &str) -> Result<Vec<ExitTicket>> {
        let count_data = evm::calldata(SEL_TICKET_COUNT, &[evm::encode_address(owner)?]);
        let count_word = self.rpc.eth_call(&self.exit_queue, &count_data).await?;
        let count: u64 = evm::hex_to_decimal(&count_word)?
            .parse()
            .map_err(|_| StakeError::Amount(count_word))?;

        let mut tickets = Vec::with_capacity(count as usize);
        for index in 0..count {
            let data = evm::calldata(
                SEL_TICKET_AT,
                &[
                    evm::encode_address(owner)?,
                    evm::encode_amount(&index.to_string())?,
                ],
            );
            let raw = self.rpc.eth_call(&self.exit_queue, &data).await?;
            // (amount, createdAt, unlockTime, fulfillable)
            let words = evm::decode_words(&raw)?;
            if words.len() < 4 {
                return Err(StakeError::Api {
                    status: 200,
                    body: format!("malformed exit ticket at index {index}"),
                });
            }
            tickets.push(ExitTicket {
                amount: words[0].clone(),
                unlock_time: words[2].parse().map_err(|_| StakeError::Amount(words[2].clone()))?,
                fulfillable: words[3] != "0",
            });
        }
        Ok(tickets)
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
impl StakeAdapter for KilnEthereumAdapter {
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
        let gas_price = self.rpc.gas_price().await?;
        let gas_limit = self
            .rpc
            .padded_gas_estimate(&address, &self.pool, native_amount, SEL_STAKE, DEFAULT_STAKE_GAS)
            .await?;
        let tx = PlannedTx::call("stake", &self.pool, SEL_STAKE.to_string())
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

        // Size the exit in shares at the current rate.
        let rate = self.share_rate().await?;
        let shares = amount::mul_div(native_amount, WAD, &rate)?;
        let calldata = evm::calldata(SEL_REQUEST_EXIT, &[evm::encode_amount(&shares)?]);

        let gas_price = self.rpc.gas_price().await?;
        let gas_limit = self
            .rpc
            .padded_gas_estimate(&address, &self.pool, "0", &calldata, DEFAULT_EXIT_GAS)
            .await?;
        let tx = PlannedTx::call("request-exit", &self.pool, calldata).with_gas(gas_limit, gas_price);
        let fee = tx.fee()?;

        let allocations = vec![
            QuoteAllocation::new(QuoteAllocationType::Unstake, asset, native_amount),
            QuoteAllocation::new(QuoteAllocationType::NetworkFee, &self.parent_asset, fee),
        ];
        let plan = self.plan(wallet, address, vec![tx]);
        Ok(ChangeQuote::new(allocations, None, Box::new(plan)))
    }

    async fn fetch_unstake_exact_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        // Exits are priced at the current rate either way.
        self.fetch_unstake_quote(wallet, asset, native_amount).await
    }

    async fn fetch_claim_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        _native_amount: &str,
    ) -> Result<ChangeQuote> {
        self.check_asset(asset)?;
        let address = wallet.get_receive_address(None).await?.public_address;
        let tickets = self.exit_tickets(&address).await?;

        let mut claimable = "0".to_string();
        let mut txs = Vec::new();
        let gas_price = self.rpc.gas_price().await?;
        for (index, ticket) in tickets.iter().enumerate() {
            if !ticket.fulfillable {
                continue;
            }
            claimable = amount::add(&claimable, &ticket.amount)?;
            let calldata = evm::calldata(SEL_CLAIM, &[evm::encode_amount(&index.to_string())?]);
            let gas_limit = self
                .rpc
                .padded_gas_estimate(&address, &self.exit_queue, "0", &calldata, DEFAULT_CLAIM_GAS)
                .await?;
            txs.push(
                PlannedTx::call(format!("claim-ticket-{index}"), &self.exit_queue, calldata)
                    .with_gas(gas_limit, gas_price.clone()),
            );
        }
        if txs.is_empty() {
            return Err(StakeError::UnsupportedOperation(
                "no fulfillable exit tickets to claim".to_string(),
            ));
        }

        let fee = evm::total_fee(&txs)?;
        let allocations = vec![
            QuoteAllocation::new(QuoteAllocationType::Claim, asset, claimable),
            QuoteAllocation::new(QuoteAllocationType::NetworkFee, &self.parent_asset, fee),
        ];
        let plan = self.plan(wallet, address, txs);
        Ok(ChangeQuote::new(allocations, None, Box::new(plan)))
    }

    async fn fetch_stake_position(&self, wallet: Arc<dyn StakeWallet>) -> Result<StakePosition> {
        let address = wallet.get_receive_address(None).await?.public_address;

        let (shares, rate, tickets) = tokio::try_join!(
            self.rpc.erc20_balance(&self.pool, &address),
            self.share_rate(),
            self.exit_tickets(&address),
        )?;
        let staked = amount::mul_div(&shares, &rate, WAD)?;
        reconcile_position(&self.stake_asset, &staked, &tickets, Utc::now())
    }

    async fn fetch_yield_info(&self) -> Result<YieldInfo> {
        let url = format!("{}/v1/eth/network-stats", self.api_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let body = stakeport_common::utils::fetch::take_json(response).await?;
        let apy = body
            .pointer("/data/network_gross_apy")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);
        Ok(YieldInfo {
            apy,
            yield_type: YieldType::Variable,
        })
    }
}

/// Combines the share-value read with the exit queue: unfulfillable tickets
/// stay locked (reported with their unlock date), fulfillable ones make up
/// the claimable total.
pub(crate) fn reconcile_position(
    asset: &AssetRef,
    staked: &str,
    tickets: &[ExitTicket],
    now: DateTime<Utc>,
) -> Result<StakePosition> {
    let mut allocations = vec![PositionAllocation::new(
        PositionAllocationType::Staked,
        asset,
        staked,
    )];

    let mut claimable = "0".to_string();
    for ticket in tickets {
        if ticket.fulfillable {
            claimable = amount::add(&claimable, &ticket.amount)?;
        } else {
            let locktime = DateTime::<Utc>::from_timestamp(ticket.unlock_time, 0).unwrap_or(now);
            allocations.push(
                PositionAllocation::new(PositionAllocationType::Unstaked, asset, &ticket.amount)
                    .with_locktime(locktime),
            );
        }
    }

    let can_claim = !amount::is_zero(&claimable)?;
    if can_claim {
        allocations.push(PositionAllocation::new(
            PositionAllocationType::Unstaked,
            asset,
            &claimable,
        ));
    }

    Ok(StakePosition {
        can_stake: true,
        can_unstake: !amount::is_zero(staked)?,
        can_unstake_and_claim: false,
        can_claim,
        allocations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth() -> AssetRef {
        AssetRef::new("ethereum", "ETH")
    }

    #[test]
    fn test_empty_exit_queue_is_not_claimable() {
        let position = reconcile_position(&eth(), "0", &[], Utc::now()).unwrap();
        assert!(!position.can_claim);
        assert!(!position.can_unstake);
        for allocation in &position.allocations {
            assert_eq!(allocation.native_amount, "0");
        }
    }

    #[test]
    fn test_pending_ticket_reports_locktime() {
        let unlock = Utc::now().timestamp() + 86_400;
        let tickets = vec![ExitTicket {
            amount: "1000000000000000000".to_string(),
            unlock_time: unlock,
            fulfillable: false,
        }];
        let position =
            reconcile_position(&eth(), "2000000000000000000", &tickets, Utc::now()).unwrap();
        assert!(!position.can_claim);
        let unstaked: Vec<_> = position
            .allocations
            .iter()
            .filter(|a| a.allocation_type == PositionAllocationType::Unstaked)
            .collect();
        assert_eq!(unstaked.len(), 1);
        assert_eq!(unstaked[0].locktime.unwrap().timestamp(), unlock);
    }

    #[test]
    fn test_fulfillable_tickets_aggregate_into_claimable() {
        let tickets = vec![
            ExitTicket {
                amount: "300".to_string(),
                unlock_time: 0,
                fulfillable: true,
            },
            ExitTicket {
                amount: "700".to_string(),
                unlock_time: 0,
                fulfillable: true,
            },
        ];
        let position = reconcile_position(&eth(), "0", &tickets, Utc::now()).unwrap();
        assert!(position.can_claim);
        let claimable = position
            .allocations
            .iter()
            .find(|a| a.allocation_type == PositionAllocationType::Unstaked && a.locktime.is_none())
            .unwrap();
        assert_eq!(claimable.native_amount, "1000");
    }

    #[test]
    fn test_position_queries_are_idempotent() {
        let now = Utc::now();
        let tickets = vec![ExitTicket {
            amount: "500".to_string(),
            unlock_time: now.timestamp() + 3600,
            fulfillable: false,
        }];
        let first = reconcile_position(&eth(), "12345", &tickets, now).unwrap();
        let second = reconcile_position(&eth(), "12345", &tickets, now).unwrap();
        assert_eq!(first.allocations, second.allocations);
    }
}
