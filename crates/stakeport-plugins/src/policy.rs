//! Static policy configuration and its runtime view.

use stakeport_common::types::{
    AssetRef, PolicyFlags, StakePolicy, StakeProviderInfo, StakeWarnings, YieldInfo,
};

use crate::adapters::AdapterConfig;

/// One staking offering as authored in the policy tables: identity, the
/// fee-paying parent chain, provider display info, the adapter wiring, and
/// the asset sets. Constructed once at process start and never mutated.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub stake_policy_id: String,
    pub parent_plugin_id: String,
    pub parent_currency_code: String,
    pub stake_provider_info: StakeProviderInfo,
    pub adapter_config: AdapterConfig,
    pub stake_assets: Vec<AssetRef>,
    pub reward_assets: Vec<AssetRef>,
    pub flags: PolicyFlags,
    pub warnings: StakeWarnings,
}

impl PolicyConfig {
    /// The user-facing policy record, with yield data resolved (or
    /// defaulted when the yield fetch failed).
    pub fn resolve(&self, yield_info: Option<YieldInfo>) -> StakePolicy {
        StakePolicy {
            stake_policy_id: self.stake_policy_id.clone(),
            stake_provider_info: self.stake_provider_info.clone(),
            parent_plugin_id: self.parent_plugin_id.clone(),
            parent_currency_code: self.parent_currency_code.clone(),
            apy: yield_info.map_or(0.0, |info| info.apy),
            yield_type: yield_info.map(|info| info.yield_type),
            stake_assets: self.stake_assets.clone(),
            reward_assets: self.reward_assets.clone(),
            flags: self.flags,
            warnings: self.warnings.clone(),
        }
    }
}
