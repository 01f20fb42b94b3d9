use serde::{Deserialize, Serialize};

use super::allocation::PositionAllocation;

/// A snapshot of the caller's standing in one policy. Derived fresh on
/// every query; stale staking balances are a financial-display hazard, so
/// positions are never cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakePosition {
    pub allocations: Vec<PositionAllocation>,
    pub can_stake: bool,
    pub can_unstake: bool,
    pub can_unstake_and_claim: bool,
    pub can_claim: bool,
}
