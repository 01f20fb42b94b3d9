//! The generic plugin facade: policy resolution and request routing.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use stakeport_common::errors::{Result, StakeError};
use stakeport_common::plugin::StakePlugin;
use stakeport_common::types::{
    ChangeQuote, ChangeQuoteRequest, PolicyFilter, StakeAction, StakePolicy, StakePosition,
    StakePositionRequest,
};
use stakeport_common::wallet::StakeWallet;

use crate::adapters::{make_adapter, StakeAdapter};
use crate::policy::PolicyConfig;

/// A slow yield feed must not hold up startup.
const YIELD_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GenericStakePlugin {
    policies: Vec<StakePolicy>,
    adapters: HashMap<String, Arc<dyn StakeAdapter>>,
}

impl GenericStakePlugin {
    /// Builds the plugin from its policy tables. A misconfigured policy is
    /// skipped with a warning so one bad entry cannot take down the whole
    /// family; a failed or slow yield fetch resolves to an unknown APY.
    pub async fn new(configs: Vec<PolicyConfig>) -> Self {
        let mut adapters = HashMap::new();
        let mut constructed = Vec::new();
        for config in configs {
            match make_adapter(&config) {
                Ok(adapter) => {
                    adapters.insert(config.stake_policy_id.clone(), adapter.clone());
                    constructed.push((config, adapter));
                }
                Err(err) => {
                    warn!("skipping policy {}: {err}", config.stake_policy_id);
                }
            }
        }

        let yields = join_all(constructed.iter().map(|(config, adapter)| async move {
            match tokio::time::timeout(YIELD_FETCH_TIMEOUT, adapter.fetch_yield_info()).await {
                Ok(Ok(yield_info)) => Some(yield_info),
                Ok(Err(err)) => {
                    warn!("yield fetch for {} failed: {err}", config.stake_policy_id);
                    None
                }
                Err(_) => {
                    warn!("yield fetch for {} timed out", config.stake_policy_id);
                    None
                }
            }
        }))
        .await;

        let policies = constructed
            .iter()
            .zip(yields)
            .map(|((config, _), yield_info)| config.resolve(yield_info))
            .collect();
        info!("resolved {} staking policies", adapters.len());
        Self { policies, adapters }
    }

    fn lookup(&self, stake_policy_id: &str) -> Result<(&StakePolicy, &Arc<dyn StakeAdapter>)> {
        let policy = self
            .policies
            .iter()
            .find(|policy| policy.stake_policy_id == stake_policy_id)
            .ok_or_else(|| StakeError::UnknownPolicy(stake_policy_id.to_string()))?;
        let adapter = self
            .adapters
            .get(stake_policy_id)
            .ok_or_else(|| StakeError::UnknownPolicy(stake_policy_id.to_string()))?;
        Ok((policy, adapter))
    }
}

#[async_trait]
impl StakePlugin for GenericStakePlugin {
    fn policies(&self, filter: Option<&PolicyFilter>) -> Vec<StakePolicy> {
        match filter {
            Some(filter) => self
                .policies
                .iter()
                .filter(|policy| policy.matches(filter))
                .cloned()
                .collect(),
            None => self.policies.clone(),
        }
    }

    async fn fetch_change_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        request: &ChangeQuoteRequest,
    ) -> Result<ChangeQuote> {
        let (policy, adapter) = self.lookup(&request.stake_policy_id)?;
        if !policy.owns_asset(&request.asset) {
            return Err(StakeError::AssetMismatch {
                plugin_id: request.asset.plugin_id.clone(),
                currency_code: request.asset.currency_code.clone(),
            });
        }

        let asset = &request.asset;
        let native_amount = request.native_amount.as_str();
        match request.action {
            StakeAction::Stake => adapter.fetch_stake_quote(wallet, asset, native_amount).await,
            StakeAction::Unstake => {
                adapter.fetch_unstake_quote(wallet, asset, native_amount).await
            }
            StakeAction::UnstakeExact => {
                adapter
                    .fetch_unstake_exact_quote(wallet, asset, native_amount)
                    .await
            }
            StakeAction::Claim => adapter.fetch_claim_quote(wallet, asset, native_amount).await,
        }
    }

    async fn fetch_stake_position(
        &self,
        wallet: Arc<dyn StakeWallet>,
        request: &StakePositionRequest,
    ) -> Result<StakePosition> {
        let (_, adapter) = self.lookup(&request.stake_policy_id)?;
        adapter.fetch_stake_position(wallet).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakeport_common::types::{
        ApprovePlan, AssetRef, PolicyFlags, QuoteAllocation, QuoteAllocationType,
        StakeProviderInfo, StakeWarnings, YieldInfo, YieldType,
    };
    use stakeport_common::wallet::{
        AddressInfo, ReceiveAddress, SignedTx, SpendInfo, UnsignedTx,
    };

    struct NoopPlan;

    #[async_trait]
    impl ApprovePlan for NoopPlan {
        async fn execute(&self) -> Result<()> {
            Ok(())
        }
    }

    struct StubAdapter {
        stake_policy_id: String,
        asset: AssetRef,
    }

    impl StubAdapter {
        fn quote(&self, allocation_type: QuoteAllocationType, native_amount: &str) -> ChangeQuote {
            ChangeQuote::new(
                vec![QuoteAllocation::new(
                    allocation_type,
                    &self.asset,
                    native_amount,
                )],
                None,
                Box::new(NoopPlan),
            )
        }
    }

    #[async_trait]
    impl StakeAdapter for StubAdapter {
        fn stake_policy_id(&self) -> &str {
            &self.stake_policy_id
        }

        async fn fetch_stake_quote(
            &self,
            _wallet: Arc<dyn StakeWallet>,
            _asset: &AssetRef,
            native_amount: &str,
        ) -> Result<ChangeQuote> {
            Ok(self.quote(QuoteAllocationType::Stake, native_amount))
        }

        async fn fetch_unstake_quote(
            &self,
            _wallet: Arc<dyn StakeWallet>,
            _asset: &AssetRef,
            native_amount: &str,
        ) -> Result<ChangeQuote> {
            Ok(self.quote(QuoteAllocationType::Unstake, native_amount))
        }

        async fn fetch_unstake_exact_quote(
            &self,
            _wallet: Arc<dyn StakeWallet>,
            _asset: &AssetRef,
            native_amount: &str,
        ) -> Result<ChangeQuote> {
            Ok(self.quote(QuoteAllocationType::Unstake, native_amount))
        }

        async fn fetch_claim_quote(
            &self,
            _wallet: Arc<dyn StakeWallet>,
            _asset: &AssetRef,
            native_amount: &str,
        ) -> Result<ChangeQuote> {
            Ok(self.quote(QuoteAllocationType::Claim, native_amount))
        }

        async fn fetch_stake_position(
            &self,
            _wallet: Arc<dyn StakeWallet>,
        ) -> Result<StakePosition> {
            Ok(StakePosition::default())
        }

        async fn fetch_yield_info(&self) -> Result<YieldInfo> {
            Ok(YieldInfo {
                apy: 4.2,
                yield_type: YieldType::Variable,
            })
        }
    }

    struct MockWallet;

    #[async_trait]
    impl StakeWallet for MockWallet {
        async fn get_receive_address(&self, _token_id: Option<&str>) -> Result<ReceiveAddress> {
            Ok(ReceiveAddress {
                public_address: "addr0".to_string(),
                native_balance: Some("0".to_string()),
            })
        }

        async fn get_addresses(&self, _token_id: Option<&str>) -> Result<Vec<AddressInfo>> {
            Ok(Vec::new())
        }

        fn balance_of(&self, _token_id: Option<&str>) -> Option<String> {
            Some("0".to_string())
        }

        async fn make_spend(&self, _spend_info: &SpendInfo) -> Result<UnsignedTx> {
            unreachable!("facade tests never spend")
        }

        async fn sign_tx(&self, _tx: &UnsignedTx) -> Result<SignedTx> {
            unreachable!("facade tests never sign")
        }

        async fn broadcast_tx(&self, _tx: &SignedTx) -> Result<String> {
            unreachable!("facade tests never broadcast")
        }

        async fn save_tx(&self, _tx: &SignedTx) -> Result<()> {
            Ok(())
        }

        async fn sign_message(&self, _message: &str) -> Result<String> {
            unreachable!("facade tests never sign messages")
        }
    }

    fn test_plugin() -> GenericStakePlugin {
        let asset = AssetRef::new("bitcoin", "BTC");
        let policy = StakePolicy {
            stake_policy_id: "btc-test".to_string(),
            stake_provider_info: StakeProviderInfo {
                display_name: "Test".to_string(),
                plugin_id: "bitcoin".to_string(),
                stake_provider_id: "test".to_string(),
            },
            parent_plugin_id: "bitcoin".to_string(),
            parent_currency_code: "BTC".to_string(),
            apy: 0.0,
            yield_type: None,
            stake_assets: vec![asset.clone()],
            reward_assets: vec![asset.clone()],
            flags: PolicyFlags::default(),
            warnings: StakeWarnings::default(),
        };
        let adapter: Arc<dyn StakeAdapter> = Arc::new(StubAdapter {
            stake_policy_id: "btc-test".to_string(),
            asset,
        });
        let mut adapters = HashMap::new();
        adapters.insert("btc-test".to_string(), adapter);
        GenericStakePlugin {
            policies: vec![policy],
            adapters,
        }
    }

    #[tokio::test]
    async fn test_unknown_policy_is_a_hard_error() {
        let plugin = test_plugin();
        let request = ChangeQuoteRequest {
            stake_policy_id: "nope".to_string(),
            action: StakeAction::Stake,
            asset: AssetRef::new("bitcoin", "BTC"),
            native_amount: "1".to_string(),
        };
        let result = plugin.fetch_change_quote(Arc::new(MockWallet), &request).await;
        assert!(matches!(result, Err(StakeError::UnknownPolicy(_))));
    }

    #[tokio::test]
    async fn test_foreign_asset_is_rejected() {
        let plugin = test_plugin();
        let request = ChangeQuoteRequest {
            stake_policy_id: "btc-test".to_string(),
            action: StakeAction::Stake,
            asset: AssetRef::new("litecoin", "LTC"),
            native_amount: "1".to_string(),
        };
        let result = plugin.fetch_change_quote(Arc::new(MockWallet), &request).await;
        assert!(matches!(result, Err(StakeError::AssetMismatch { .. })));
    }

    #[tokio::test]
    async fn test_action_dispatch() {
        let plugin = test_plugin();
        let cases = [
            (StakeAction::Stake, QuoteAllocationType::Stake),
            (StakeAction::Unstake, QuoteAllocationType::Unstake),
            (StakeAction::UnstakeExact, QuoteAllocationType::Unstake),
            (StakeAction::Claim, QuoteAllocationType::Claim),
        ];
        for (action, expected) in cases {
            let request = ChangeQuoteRequest {
                stake_policy_id: "btc-test".to_string(),
                action,
                asset: AssetRef::new("bitcoin", "BTC"),
                native_amount: "5000000000".to_string(),
            };
            let quote = plugin
                .fetch_change_quote(Arc::new(MockWallet), &request)
                .await
                .unwrap();
            assert_eq!(quote.allocations[0].allocation_type, expected);
            assert_eq!(quote.allocations[0].native_amount, "5000000000");
        }
    }

    #[tokio::test]
    async fn test_policy_filtering_returns_fresh_lists() {
        let plugin = test_plugin();
        assert_eq!(plugin.policies(None).len(), 1);

        let matching = PolicyFilter {
            plugin_id: Some("bitcoin".to_string()),
            currency_code: None,
        };
        assert_eq!(plugin.policies(Some(&matching)).len(), 1);

        let foreign = PolicyFilter {
            plugin_id: Some("ethereum".to_string()),
            currency_code: None,
        };
        assert!(plugin.policies(Some(&foreign)).is_empty());
        // The held list is untouched by filtering.
        assert_eq!(plugin.policies(None).len(), 1);
    }

    #[tokio::test]
    async fn test_misconfigured_policies_are_skipped() {
        use crate::adapters::{AdapterConfig, StakeKitConfig};

        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let config = PolicyConfig {
            stake_policy_id: "coreum-no-key".to_string(),
            parent_plugin_id: "coreum".to_string(),
            parent_currency_code: "COREUM".to_string(),
            stake_provider_info: StakeProviderInfo {
                display_name: "Coreum".to_string(),
                plugin_id: "coreum".to_string(),
                stake_provider_id: "stakekit".to_string(),
            },
            adapter_config: AdapterConfig::CoreumNativeStakeKit(StakeKitConfig {
                api_url: "https://api.stakek.it".to_string(),
                api_key: None,
                integration_id: "coreum-core-native-staking".to_string(),
                validator_address: "corevaloper1qq".to_string(),
                decimals: 6,
            }),
            stake_assets: vec![AssetRef::new("coreum", "COREUM")],
            reward_assets: vec![AssetRef::new("coreum", "COREUM")],
            flags: PolicyFlags::default(),
            warnings: StakeWarnings::default(),
        };

        let plugin = GenericStakePlugin::new(vec![config]).await;
        assert!(plugin.policies(None).is_empty());
    }
}
