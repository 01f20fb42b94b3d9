//! The savers plugin: quote construction, positions, and the funding
//! fallback for multi-address wallets.

use async_trait::async_trait;
use ethnum::U256;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use stakeport_common::errors::{Result, StakeError};
use stakeport_common::plugin::StakePlugin;
use stakeport_common::types::{
    AssetRef, ChangeQuote, ChangeQuoteRequest, PolicyFilter, PositionAllocation,
    PositionAllocationType, QuoteAllocation, QuoteAllocationType, QuoteInfo, StakeAction,
    StakePolicy, StakePosition, StakePositionRequest,
};
use stakeport_common::utils::amount;
use stakeport_common::wallet::{SpendInfo, SpendPlan, SpendTarget, StakeWallet};

use crate::exchange::ExchangeInfoService;
use crate::info::{savers_policies, SaversPolicyConfig};
use crate::thornode::{MidgardClient, SaverPosition, ThornodeClient};

const YIELD_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Representative-saver scans stop here; an unbounded scan over a popular
/// pool would dominate quote latency.
const SAVER_SCAN_LIMIT: usize = 100;
const FALLBACK_DUST_THRESHOLD: &str = "10000";

pub struct SaversPlugin {
    policies: Vec<(SaversPolicyConfig, StakePolicy)>,
    thornode: ThornodeClient,
}

/// How an operation gets funded when the wallet's primary address cannot
/// cover it alone.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FundingPlan {
    /// Transfer this much to the primary address first, when set.
    top_up: Option<String>,
    /// Combined network fee across one or two transactions.
    total_fee: String,
}

impl SaversPlugin {
    /// Builds the plugin, resolving each pool's savers APR concurrently.
    /// A failed or slow APR fetch resolves to an unknown yield.
    pub async fn new(info_servers: Vec<String>) -> Self {
        let exchange = Arc::new(ExchangeInfoService::new(info_servers));
        let thornode = ThornodeClient::new(exchange.clone());
        let midgard = MidgardClient::new(exchange);

        let configs = savers_policies();
        let aprs = join_all(configs.iter().map(|config| {
            let midgard = &midgard;
            async move {
                match tokio::time::timeout(
                    YIELD_FETCH_TIMEOUT,
                    midgard.savers_apr(&config.pool_asset),
                )
                .await
                {
                    Ok(Ok(apr)) => apr,
                    Ok(Err(err)) => {
                        warn!("savers APR fetch for {} failed: {err}", config.pool_asset);
                        0.0
                    }
                    Err(_) => {
                        warn!("savers APR fetch for {} timed out", config.pool_asset);
                        0.0
                    }
                }
            }
        }))
        .await;

        let policies: Vec<_> = configs
            .into_iter()
            .zip(aprs)
            .map(|(config, apr)| {
                let policy = config.resolve(apr);
                (config, policy)
            })
            .collect();
        info!("resolved {} savers policies", policies.len());
        Self { policies, thornode }
    }

    fn lookup(&self, stake_policy_id: &str) -> Result<&(SaversPolicyConfig, StakePolicy)> {
        self.policies
            .iter()
            .find(|(_, policy)| policy.stake_policy_id == stake_policy_id)
            .ok_or_else(|| StakeError::UnknownPolicy(stake_policy_id.to_string()))
    }

    /// The wallet's primary address and its own balance.
    async fn primary_address(&self, wallet: &Arc<dyn StakeWallet>) -> Result<(String, String)> {
        let addresses = wallet.get_addresses(None).await?;
        let primary = addresses
            .first()
            .ok_or_else(|| StakeError::Config("wallet reported no addresses".to_string()))?;
        let balance = primary
            .native_balance
            .clone()
            .unwrap_or_else(|| "0".to_string());
        Ok((primary.public_address.clone(), balance))
    }

    async fn stake_quote(
        &self,
        config: &SaversPolicyConfig,
        apr: f64,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        native_amount: &str,
    ) -> Result<ChangeQuote> {
        let total_balance = wallet.balance_of(None).unwrap_or_else(|| "0".to_string());
        if !amount::gte(&total_balance, native_amount)? {
            return Err(StakeError::InsufficientFunds {
                currency_code: asset.currency_code.clone(),
            });
        }

        let quote = self
            .thornode
            .deposit_quote(&config.pool_asset, native_amount)
            .await?;
        let (primary_address, primary_balance) = self.primary_address(&wallet).await?;

        // Discover the chain fee by drafting the deposit itself.
        let draft = SpendInfo {
            token_id: None,
            spend_targets: vec![SpendTarget {
                public_address: quote.inbound_address.clone(),
                native_amount: native_amount.to_string(),
                memo: Some(quote.memo.clone()),
            }],
            other_params: None,
        };
        let unsigned = wallet.make_spend(&draft).await?;
        let fee = unsigned.network_fee.clone();

        let funding = plan_funding(
            native_amount,
            &fee,
            &primary_balance,
            &total_balance,
            &asset.currency_code,
        )?;

        let slippage = slippage_of(native_amount, &quote.expected_amount_deposit)?;
        let future_fee = match self.estimate_unstake_fee(config, native_amount).await {
            Ok(fee) => Some(fee),
            Err(err) => {
                debug!("future unstake fee estimate skipped: {err}");
                None
            }
        };

        let allocations =
            stake_allocations(asset, native_amount, &funding.total_fee, &slippage, future_fee)?;
        let quote_info = quote_info_for(&allocations, native_amount, apr);
        let plan = SpendPlan {
            wallet,
            spends: build_spends(&primary_address, draft, &funding),
        };
        Ok(ChangeQuote::new(allocations, quote_info, Box::new(plan)))
    }

    /// Shared by unstake, unstake-exact, and claim; they differ only in how
    /// much of the redeemable value they release and how the movement is
    /// labeled.
    async fn withdraw_quote(
        &self,
        config: &SaversPolicyConfig,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
        requested: &str,
        movement: QuoteAllocationType,
    ) -> Result<ChangeQuote> {
        let (primary_address, primary_balance) = self.primary_address(&wallet).await?;
        let position = self
            .thornode
            .saver_position(&config.pool_asset, &primary_address)
            .await?
            .ok_or_else(|| {
                StakeError::UnsupportedOperation("no savers position to withdraw".to_string())
            })?;

        let basis_points = amount::to_basis_points(requested, &position.asset_redeem_value)?;
        let inbound = self.thornode.inbound_address_for(&config.chain).await?;
        let dust = inbound
            .dust_threshold
            .clone()
            .unwrap_or_else(|| FALLBACK_DUST_THRESHOLD.to_string());
        // The pool reads the withdrawal fraction out of the literal amount
        // sent: dust floor plus the basis points.
        let send_amount = withdraw_send_amount(&dust, basis_points)?;

        let quote = self
            .thornode
            .withdraw_quote(&config.pool_asset, &primary_address, basis_points)
            .await?;

        let draft = SpendInfo {
            token_id: None,
            spend_targets: vec![SpendTarget {
                public_address: inbound.address.clone(),
                native_amount: send_amount.clone(),
                memo: None,
            }],
            other_params: None,
        };
        let unsigned = wallet.make_spend(&draft).await?;
        let fee = unsigned.network_fee.clone();

        let total_balance = wallet.balance_of(None).unwrap_or_else(|| "0".to_string());
        let funding = plan_funding(
            &send_amount,
            &fee,
            &primary_balance,
            &total_balance,
            &asset.currency_code,
        )?;

        let mut allocations = vec![
            QuoteAllocation::new(movement, asset, requested),
            QuoteAllocation::new(QuoteAllocationType::NetworkFee, asset, &funding.total_fee),
        ];
        let slippage = slippage_of(requested, &quote.expected_amount_out)?;
        if !amount::is_zero(&slippage)? {
            allocations.push(QuoteAllocation::new(
                QuoteAllocationType::DeductedFee,
                asset,
                slippage,
            ));
        }

        let plan = SpendPlan {
            wallet,
            spends: build_spends(&primary_address, draft, &funding),
        };
        Ok(ChangeQuote::new(allocations, None, Box::new(plan)))
    }

    async fn claim_quote(
        &self,
        config: &SaversPolicyConfig,
        wallet: Arc<dyn StakeWallet>,
        asset: &AssetRef,
    ) -> Result<ChangeQuote> {
        let (primary_address, _) = self.primary_address(&wallet).await?;
        let position = self
            .thornode
            .saver_position(&config.pool_asset, &primary_address)
            .await?
            .ok_or_else(|| {
                StakeError::UnsupportedOperation("no savers position to claim from".to_string())
            })?;
        let earned = earned_of(&position.asset_deposit_value, &position.asset_redeem_value)?;
        if amount::is_zero(&earned)? {
            return Err(StakeError::UnsupportedOperation(
                "nothing has been earned yet".to_string(),
            ));
        }
        self.withdraw_quote(config, wallet, asset, &earned, QuoteAllocationType::Claim)
            .await
    }

    /// Prices a future unstake by simulating a withdrawal against a
    /// third-party saver of comparable size, never touching the caller's
    /// funds. The scan over the pool's savers is capped.
    async fn estimate_unstake_fee(
        &self,
        config: &SaversPolicyConfig,
        native_amount: &str,
    ) -> Result<String> {
        let savers = self.thornode.savers(&config.pool_asset).await?;
        let representative = find_representative_saver(&savers, native_amount)?.ok_or_else(|| {
            StakeError::UnsupportedOperation(format!(
                "no saver of comparable size within the first {SAVER_SCAN_LIMIT}"
            ))
        })?;
        let quote = self
            .thornode
            .withdraw_quote(
                &config.pool_asset,
                &representative.asset_address,
                amount::MAX_BASIS_POINTS,
            )
            .await?;
        Ok(quote
            .fees
            .total
            .or(quote.fees.outbound)
            .unwrap_or_else(|| "0".to_string()))
    }
}

#[async_trait]
impl StakePlugin for SaversPlugin {
    fn policies(&self, filter: Option<&PolicyFilter>) -> Vec<StakePolicy> {
        self.policies
            .iter()
            .map(|(_, policy)| policy)
            .filter(|policy| filter.map_or(true, |filter| policy.matches(filter)))
            .cloned()
            .collect()
    }

    async fn fetch_change_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        request: &ChangeQuoteRequest,
    ) -> Result<ChangeQuote> {
        let (config, policy) = self.lookup(&request.stake_policy_id)?;
        if !policy.owns_asset(&request.asset) {
            return Err(StakeError::AssetMismatch {
                plugin_id: request.asset.plugin_id.clone(),
                currency_code: request.asset.currency_code.clone(),
            });
        }

        let asset = &request.asset;
        let native_amount = request.native_amount.as_str();
        match request.action {
            StakeAction::Stake => {
                self.stake_quote(config, policy.apy, wallet, asset, native_amount)
                    .await
            }
            StakeAction::Unstake | StakeAction::UnstakeExact => {
                self.withdraw_quote(
                    config,
                    wallet,
                    asset,
                    native_amount,
                    QuoteAllocationType::Unstake,
                )
                .await
            }
            StakeAction::Claim => self.claim_quote(config, wallet, asset).await,
        }
    }

    async fn fetch_stake_position(
        &self,
        wallet: Arc<dyn StakeWallet>,
        request: &StakePositionRequest,
    ) -> Result<StakePosition> {
        let (config, _) = self.lookup(&request.stake_policy_id)?;
        let (primary_address, _) = self.primary_address(&wallet).await?;
        let position = self
            .thornode
            .saver_position(&config.pool_asset, &primary_address)
            .await?;
        build_position(&config.asset(), position.as_ref())
    }
}

fn plan_funding(
    send_amount: &str,
    fee: &str,
    primary_balance: &str,
    total_balance: &str,
    currency_code: &str,
) -> Result<FundingPlan> {
    let needed = amount::add(send_amount, fee)?;
    if amount::gte(primary_balance, &needed)? {
        return Ok(FundingPlan {
            top_up: None,
            total_fee: fee.to_string(),
        });
    }

    // Fund the primary address with the exact operation cost, then run the
    // operation from it: two transactions, twice the fee.
    let total_fee = amount::mul(fee, 2)?;
    if !amount::gte(total_balance, &amount::add(send_amount, &total_fee)?)? {
        return Err(StakeError::InsufficientFunds {
            currency_code: currency_code.to_string(),
        });
    }
    Ok(FundingPlan {
        top_up: Some(needed),
        total_fee,
    })
}

fn build_spends(primary_address: &str, draft: SpendInfo, funding: &FundingPlan) -> Vec<SpendInfo> {
    let mut spends = Vec::new();
    if let Some(top_up) = &funding.top_up {
        spends.push(SpendInfo {
            token_id: None,
            spend_targets: vec![SpendTarget {
                public_address: primary_address.to_string(),
                native_amount: top_up.clone(),
                memo: None,
            }],
            other_params: None,
        });
    }
    spends.push(draft);
    spends
}

fn stake_allocations(
    asset: &AssetRef,
    native_amount: &str,
    total_fee: &str,
    slippage: &str,
    future_fee: Option<String>,
) -> Result<Vec<QuoteAllocation>> {
    let mut allocations = vec![
        QuoteAllocation::new(QuoteAllocationType::Stake, asset, native_amount),
        QuoteAllocation::new(QuoteAllocationType::NetworkFee, asset, total_fee),
    ];
    if !amount::is_zero(slippage)? {
        allocations.push(QuoteAllocation::new(
            QuoteAllocationType::DeductedFee,
            asset,
            slippage,
        ));
    }
    if let Some(fee) = future_fee {
        allocations.push(QuoteAllocation::new(
            QuoteAllocationType::FutureUnstakeFee,
            asset,
            fee,
        ));
    }
    Ok(allocations)
}

fn withdraw_send_amount(dust_threshold: &str, basis_points: u32) -> Result<String> {
    amount::add(dust_threshold, &basis_points.to_string())
}

/// Days of yield needed to recoup the round-trip cost of this stake.
/// Display-only, so float precision is acceptable here.
fn quote_info_for(
    allocations: &[QuoteAllocation],
    native_amount: &str,
    apr: f64,
) -> Option<QuoteInfo> {
    let stake_amount: f64 = native_amount.parse().ok()?;
    if apr <= 0.0 || stake_amount <= 0.0 {
        return None;
    }
    let round_trip_cost: f64 = allocations
        .iter()
        .filter(|allocation| allocation.allocation_type != QuoteAllocationType::Stake)
        .filter_map(|allocation| allocation.native_amount.parse::<f64>().ok())
        .sum();
    let daily_yield = stake_amount * (apr / 100.0) / 365.0;
    Some(QuoteInfo {
        break_even_days: Some(round_trip_cost / daily_yield),
    })
}

fn slippage_of(requested: &str, expected: &str) -> Result<String> {
    if amount::gt(requested, expected)? {
        amount::sub(requested, expected)
    } else {
        Ok("0".to_string())
    }
}

fn earned_of(deposit_value: &str, redeem_value: &str) -> Result<String> {
    if amount::gt(redeem_value, deposit_value)? {
        amount::sub(redeem_value, deposit_value)
    } else {
        Ok("0".to_string())
    }
}

fn build_position(asset: &AssetRef, position: Option<&SaverPosition>) -> Result<StakePosition> {
    let Some(position) = position else {
        return Ok(StakePosition {
            allocations: Vec::new(),
            can_stake: true,
            can_unstake: false,
            can_unstake_and_claim: false,
            can_claim: false,
        });
    };

    let earned = earned_of(&position.asset_deposit_value, &position.asset_redeem_value)?;
    let has_units = !amount::is_zero(&position.units)?;
    let has_earnings = !amount::is_zero(&earned)?;

    let mut allocations = vec![PositionAllocation::new(
        PositionAllocationType::Staked,
        asset,
        &position.asset_deposit_value,
    )];
    if has_earnings {
        allocations.push(PositionAllocation::new(
            PositionAllocationType::Earned,
            asset,
            &earned,
        ));
    }

    Ok(StakePosition {
        allocations,
        can_stake: true,
        can_unstake: has_units,
        can_unstake_and_claim: has_units,
        can_claim: has_earnings,
    })
}

/// The closest-sized saver within half-to-double the target, scanning at
/// most the first `SAVER_SCAN_LIMIT` entries.
fn find_representative_saver<'a>(
    savers: &'a [SaverPosition],
    target: &str,
) -> Result<Option<&'a SaverPosition>> {
    let target = amount::parse(target)?;
    let lower = target / U256::new(2);
    let upper = target.checked_mul(U256::new(2)).unwrap_or(U256::MAX);

    let mut best: Option<(&SaverPosition, U256)> = None;
    for saver in savers.iter().take(SAVER_SCAN_LIMIT) {
        let value = amount::parse(&saver.asset_redeem_value)?;
        if value < lower || value > upper {
            continue;
        }
        let distance = if value > target {
            value - target
        } else {
            target - value
        };
        if best
            .as_ref()
            .map_or(true, |(_, best_distance)| distance < *best_distance)
        {
            best = Some((saver, distance));
        }
    }
    Ok(best.map(|(saver, _)| saver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakeport_common::wallet::{AddressInfo, ReceiveAddress, SignedTx, UnsignedTx};

    struct MockWallet {
        balance: String,
    }

    #[async_trait]
    impl StakeWallet for MockWallet {
        async fn get_receive_address(&self, _token_id: Option<&str>) -> Result<ReceiveAddress> {
            Ok(ReceiveAddress {
                public_address: "bc1qprimary".to_string(),
                native_balance: Some(self.balance.clone()),
            })
        }

        async fn get_addresses(&self, _token_id: Option<&str>) -> Result<Vec<AddressInfo>> {
            Ok(vec![AddressInfo {
                public_address: "bc1qprimary".to_string(),
                native_balance: Some(self.balance.clone()),
            }])
        }

        fn balance_of(&self, _token_id: Option<&str>) -> Option<String> {
            Some(self.balance.clone())
        }

        async fn make_spend(&self, _spend_info: &SpendInfo) -> Result<UnsignedTx> {
            unreachable!("these tests never reach the signer")
        }

        async fn sign_tx(&self, _tx: &UnsignedTx) -> Result<SignedTx> {
            unreachable!("these tests never sign")
        }

        async fn broadcast_tx(&self, _tx: &SignedTx) -> Result<String> {
            unreachable!("these tests never broadcast")
        }

        async fn save_tx(&self, _tx: &SignedTx) -> Result<()> {
            Ok(())
        }

        async fn sign_message(&self, _message: &str) -> Result<String> {
            unreachable!("these tests never sign messages")
        }
    }

    fn offline_plugin() -> SaversPlugin {
        SaversPlugin {
            policies: savers_policies()
                .into_iter()
                .map(|config| {
                    let policy = config.resolve(0.0);
                    (config, policy)
                })
                .collect(),
            thornode: ThornodeClient::new(Arc::new(ExchangeInfoService::new(Vec::new()))),
        }
    }

    fn saver(address: &str, redeem_value: &str) -> SaverPosition {
        SaverPosition {
            asset: "BTC.BTC".to_string(),
            asset_address: address.to_string(),
            units: "1".to_string(),
            asset_deposit_value: redeem_value.to_string(),
            asset_redeem_value: redeem_value.to_string(),
        }
    }

    #[test]
    fn test_funding_fallback_arithmetic() {
        // Primary covers amount + fee: single transaction, single fee.
        let direct = plan_funding("5000", "100", "6000", "10000", "BTC").unwrap();
        assert_eq!(direct.top_up, None);
        assert_eq!(direct.total_fee, "100");

        // Primary is short: the top-up carries the amount plus the
        // follow-up fee, and the combined fee doubles.
        let funded = plan_funding("5000", "100", "4000", "10000", "BTC").unwrap();
        assert_eq!(funded.top_up.as_deref(), Some("5100"));
        assert_eq!(funded.total_fee, "200");

        // The whole wallet cannot cover both transactions.
        let result = plan_funding("5000", "100", "4000", "5150", "BTC");
        assert!(matches!(
            result,
            Err(StakeError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_funding_spend_order() {
        let draft = SpendInfo {
            token_id: None,
            spend_targets: vec![SpendTarget {
                public_address: "inbound".to_string(),
                native_amount: "5000".to_string(),
                memo: Some("+:BTC.BTC".to_string()),
            }],
            other_params: None,
        };
        let funding = FundingPlan {
            top_up: Some("5100".to_string()),
            total_fee: "200".to_string(),
        };
        let spends = build_spends("bc1qprimary", draft, &funding);
        assert_eq!(spends.len(), 2);
        assert_eq!(spends[0].spend_targets[0].public_address, "bc1qprimary");
        assert_eq!(spends[0].spend_targets[0].native_amount, "5100");
        assert_eq!(spends[1].spend_targets[0].public_address, "inbound");
    }

    #[test]
    fn test_half_position_withdraw_encoding() {
        let basis_points = amount::to_basis_points("5000", "10000").unwrap();
        assert_eq!(basis_points, 5000);
        assert_eq!(withdraw_send_amount("10000", basis_points).unwrap(), "15000");
    }

    #[test]
    fn test_stake_allocations_conserve_the_request() {
        let asset = AssetRef::new("bitcoin", "BTC");
        let allocations =
            stake_allocations(&asset, "5000000000", "2500", "12", Some("900".to_string()))
                .unwrap();

        let staked: Vec<_> = allocations
            .iter()
            .filter(|a| a.allocation_type == QuoteAllocationType::Stake)
            .collect();
        assert_eq!(staked.len(), 1);
        assert_eq!(staked[0].native_amount, "5000000000");

        let fees: Vec<_> = allocations
            .iter()
            .filter(|a| a.allocation_type == QuoteAllocationType::NetworkFee)
            .collect();
        assert_eq!(fees.len(), 1);
        assert!(amount::gt(&fees[0].native_amount, "0").unwrap());

        assert!(allocations
            .iter()
            .any(|a| a.allocation_type == QuoteAllocationType::FutureUnstakeFee));
    }

    #[test]
    fn test_break_even_reflects_round_trip_cost() {
        let asset = AssetRef::new("bitcoin", "BTC");
        // 1 BTC staked at 3.65% APR earns 10k sats per day; 25k sats of
        // fees take 2.5 days to recoup.
        let allocations =
            stake_allocations(&asset, "100000000", "20000", "5000", None).unwrap();
        let info = quote_info_for(&allocations, "100000000", 3.65).unwrap();
        let days = info.break_even_days.unwrap();
        assert!((days - 2.5).abs() < 1e-9);

        // No yield, no break-even figure.
        assert!(quote_info_for(&allocations, "100000000", 0.0).is_none());
    }

    #[test]
    fn test_failed_fee_estimate_is_omitted() {
        let asset = AssetRef::new("bitcoin", "BTC");
        let allocations = stake_allocations(&asset, "5000000000", "2500", "0", None).unwrap();
        assert_eq!(allocations.len(), 2);
    }

    #[test]
    fn test_representative_saver_selection() {
        let savers = vec![
            saver("addr-tiny", "10"),
            saver("addr-close", "90000"),
            saver("addr-closer", "101000"),
            saver("addr-huge", "900000000"),
        ];
        let found = find_representative_saver(&savers, "100000").unwrap().unwrap();
        assert_eq!(found.asset_address, "addr-closer");

        // Nothing within half-to-double the target.
        assert!(find_representative_saver(&savers, "3000").unwrap().is_none());
    }

    #[test]
    fn test_representative_scan_is_capped() {
        let mut savers: Vec<SaverPosition> =
            (0..SAVER_SCAN_LIMIT).map(|_| saver("addr-tiny", "10")).collect();
        savers.push(saver("addr-match", "100000"));
        // The only match sits past the cap, so the scan gives up.
        assert!(find_representative_saver(&savers, "100000")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_empty_position_has_nothing_claimable() {
        let asset = AssetRef::new("bitcoin", "BTC");
        let position = build_position(&asset, None).unwrap();
        assert!(!position.can_claim);
        assert!(position.allocations.is_empty());

        let flat = saver("bc1qprimary", "7000000");
        let position = build_position(&asset, Some(&flat)).unwrap();
        assert!(!position.can_claim);
        assert!(position
            .allocations
            .iter()
            .all(|a| a.allocation_type == PositionAllocationType::Staked));
    }

    #[test]
    fn test_earnings_become_claimable() {
        let asset = AssetRef::new("bitcoin", "BTC");
        let mut grown = saver("bc1qprimary", "7000000");
        grown.asset_deposit_value = "6500000".to_string();
        let position = build_position(&asset, Some(&grown)).unwrap();
        assert!(position.can_claim);
        let earned = position
            .allocations
            .iter()
            .find(|a| a.allocation_type == PositionAllocationType::Earned)
            .unwrap();
        assert_eq!(earned.native_amount, "500000");
    }

    #[tokio::test]
    async fn test_insufficient_balance_fails_before_any_network_call() {
        let plugin = offline_plugin();
        let wallet = Arc::new(MockWallet {
            balance: "1000000000".to_string(),
        });
        let request = ChangeQuoteRequest {
            stake_policy_id: "tcsavers-bitcoin-BTC".to_string(),
            action: StakeAction::Stake,
            asset: AssetRef::new("bitcoin", "BTC"),
            native_amount: "5000000000".to_string(),
        };
        let result = plugin.fetch_change_quote(wallet, &request).await;
        assert!(matches!(
            result,
            Err(StakeError::InsufficientFunds { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_policy_and_foreign_asset_are_rejected() {
        let plugin = offline_plugin();
        let wallet = Arc::new(MockWallet {
            balance: "0".to_string(),
        });

        let unknown = ChangeQuoteRequest {
            stake_policy_id: "tcsavers-monero-XMR".to_string(),
            action: StakeAction::Stake,
            asset: AssetRef::new("monero", "XMR"),
            native_amount: "1".to_string(),
        };
        assert!(matches!(
            plugin.fetch_change_quote(wallet.clone(), &unknown).await,
            Err(StakeError::UnknownPolicy(_))
        ));

        let mismatched = ChangeQuoteRequest {
            stake_policy_id: "tcsavers-bitcoin-BTC".to_string(),
            action: StakeAction::Stake,
            asset: AssetRef::new("litecoin", "LTC"),
            native_amount: "1".to_string(),
        };
        assert!(matches!(
            plugin.fetch_change_quote(wallet, &mismatched).await,
            Err(StakeError::AssetMismatch { .. })
        ));
    }
}
