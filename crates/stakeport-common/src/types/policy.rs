use serde::{Deserialize, Serialize};

use super::asset::AssetRef;
use super::request::PolicyFilter;
use super::yields::YieldType;

/// Display metadata for the protocol behind a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeProviderInfo {
    pub display_name: String,
    pub plugin_id: String,
    pub stake_provider_id: String,
}

/// Feature flags controlling which actions a policy offers and how the
/// host should present it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFlags {
    pub disable_max_stake: bool,
    pub hide_claim_action: bool,
    pub hide_unstake_action: bool,
    pub hide_unstake_and_claim_action: bool,
    pub is_stable_pool: bool,
    pub is_liquid_staking: bool,
    pub must_max_unstake: bool,
    pub deprecated: bool,
}

/// Optional warning copy shown before each action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeWarnings {
    pub stake: Option<String>,
    pub unstake: Option<String>,
    pub claim: Option<String>,
}

/// A runtime-resolved staking offering: one protocol, one asset pair, one
/// set of allowed actions, plus its asynchronously fetched yield.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakePolicy {
    pub stake_policy_id: String,
    pub stake_provider_info: StakeProviderInfo,
    /// The chain whose native asset pays network fees for this policy.
    pub parent_plugin_id: String,
    pub parent_currency_code: String,
    pub apy: f64,
    pub yield_type: Option<YieldType>,
    pub stake_assets: Vec<AssetRef>,
    pub reward_assets: Vec<AssetRef>,
    pub flags: PolicyFlags,
    pub warnings: StakeWarnings,
}

impl StakePolicy {
    /// Whether any stake or reward asset matches the filter.
    pub fn matches(&self, filter: &PolicyFilter) -> bool {
        let mut assets = self.stake_assets.iter().chain(self.reward_assets.iter());
        assets.any(|asset| {
            filter
                .plugin_id
                .as_ref()
                .map_or(true, |plugin_id| &asset.plugin_id == plugin_id)
                && filter
                    .currency_code
                    .as_ref()
                    .map_or(true, |code| &asset.currency_code == code)
        })
    }

    /// Whether the asset belongs to this policy's stake or reward set.
    pub fn owns_asset(&self, asset: &AssetRef) -> bool {
        self.stake_assets.contains(asset) || self.reward_assets.contains(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> StakePolicy {
        StakePolicy {
            stake_policy_id: "btc-savers".to_string(),
            stake_provider_info: StakeProviderInfo {
                display_name: "Bitcoin Savers".to_string(),
                plugin_id: "thorchainrune".to_string(),
                stake_provider_id: "tcsavers".to_string(),
            },
            parent_plugin_id: "bitcoin".to_string(),
            parent_currency_code: "BTC".to_string(),
            apy: 1.8,
            yield_type: Some(YieldType::Variable),
            stake_assets: vec![AssetRef::new("bitcoin", "BTC")],
            reward_assets: vec![AssetRef::new("bitcoin", "BTC")],
            flags: PolicyFlags::default(),
            warnings: StakeWarnings::default(),
        }
    }

    #[test]
    fn test_filter_matching() {
        let policy = policy();
        assert!(policy.matches(&PolicyFilter::default()));
        assert!(policy.matches(&PolicyFilter {
            plugin_id: Some("bitcoin".to_string()),
            currency_code: None,
        }));
        assert!(!policy.matches(&PolicyFilter {
            plugin_id: Some("ethereum".to_string()),
            currency_code: None,
        }));
        assert!(!policy.matches(&PolicyFilter {
            plugin_id: Some("bitcoin".to_string()),
            currency_code: Some("LTC".to_string()),
        }));
    }

    #[test]
    fn test_owns_asset() {
        let policy = policy();
        assert!(policy.owns_asset(&AssetRef::new("bitcoin", "BTC")));
        assert!(!policy.owns_asset(&AssetRef::new("litecoin", "LTC")));
    }
}
