//! Savers policy table: which chains' vaults the plugin offers.

use stakeport_common::types::{
    AssetRef, PolicyFlags, StakePolicy, StakeProviderInfo, StakeWarnings,
};

/// One savers offering: a chain asset and its Thorchain pool.
#[derive(Debug, Clone)]
pub struct SaversPolicyConfig {
    pub stake_policy_id: String,
    pub plugin_id: String,
    pub currency_code: String,
    /// Thorchain pool notation, e.g. `BTC.BTC`.
    pub pool_asset: String,
    /// Inbound-address chain key.
    pub chain: String,
}

impl SaversPolicyConfig {
    fn new(plugin_id: &str, currency_code: &str, chain: &str) -> Self {
        Self {
            stake_policy_id: format!("tcsavers-{plugin_id}-{currency_code}"),
            plugin_id: plugin_id.to_string(),
            currency_code: currency_code.to_string(),
            pool_asset: format!("{chain}.{currency_code}"),
            chain: chain.to_string(),
        }
    }

    pub fn asset(&self) -> AssetRef {
        AssetRef::new(&self.plugin_id, &self.currency_code)
    }

    /// The user-facing policy record with the given APY.
    pub fn resolve(&self, apy: f64) -> StakePolicy {
        let asset = self.asset();
        StakePolicy {
            stake_policy_id: self.stake_policy_id.clone(),
            stake_provider_info: StakeProviderInfo {
                display_name: format!("Thorchain Savers {}", self.currency_code),
                plugin_id: "thorchainrune".to_string(),
                stake_provider_id: "tcsavers".to_string(),
            },
            parent_plugin_id: self.plugin_id.clone(),
            parent_currency_code: self.currency_code.clone(),
            apy,
            yield_type: Some(stakeport_common::types::YieldType::Variable),
            stake_assets: vec![asset.clone()],
            reward_assets: vec![asset],
            flags: PolicyFlags {
                hide_unstake_and_claim_action: true,
                ..Default::default()
            },
            warnings: StakeWarnings {
                stake: Some(
                    "Deposits pay an outbound fee and slippage when withdrawn.".to_string(),
                ),
                ..Default::default()
            },
        }
    }
}

pub fn savers_policies() -> Vec<SaversPolicyConfig> {
    vec![
        SaversPolicyConfig::new("bitcoin", "BTC", "BTC"),
        SaversPolicyConfig::new("litecoin", "LTC", "LTC"),
        SaversPolicyConfig::new("bitcoincash", "BCH", "BCH"),
        SaversPolicyConfig::new("dogecoin", "DOGE", "DOGE"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_shape() {
        let policies = savers_policies();
        assert_eq!(policies.len(), 4);
        let btc = &policies[0];
        assert_eq!(btc.stake_policy_id, "tcsavers-bitcoin-BTC");
        assert_eq!(btc.pool_asset, "BTC.BTC");
        let resolved = btc.resolve(2.5);
        assert_eq!(resolved.apy, 2.5);
        assert!(resolved.owns_asset(&AssetRef::new("bitcoin", "BTC")));
    }
}
