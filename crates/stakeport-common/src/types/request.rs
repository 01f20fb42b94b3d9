use serde::{Deserialize, Serialize};

use super::asset::AssetRef;

/// The staking operations a policy can quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StakeAction {
    Stake,
    Unstake,
    Claim,
    UnstakeExact,
}

#[derive(Debug, Clone)]
pub struct ChangeQuoteRequest {
    pub stake_policy_id: String,
    pub action: StakeAction,
    pub asset: AssetRef,
    pub native_amount: String,
}

#[derive(Debug, Clone)]
pub struct StakePositionRequest {
    pub stake_policy_id: String,
}

/// Narrows a policy listing to offerings relevant to one wallet.
#[derive(Debug, Clone, Default)]
pub struct PolicyFilter {
    pub plugin_id: Option<String>,
    pub currency_code: Option<String>,
}
