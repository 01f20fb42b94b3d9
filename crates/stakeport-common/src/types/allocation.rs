use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::asset::AssetRef;

/// The economic role a quote allocation plays within a `ChangeQuote`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuoteAllocationType {
    Stake,
    Unstake,
    Claim,
    NetworkFee,
    DeductedFee,
    FutureUnstakeFee,
}

/// One economically meaningful movement inside a quote. `native_amount` is
/// a decimal-string integer in the asset's smallest unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteAllocation {
    pub allocation_type: QuoteAllocationType,
    pub plugin_id: String,
    pub currency_code: String,
    pub native_amount: String,
}

impl QuoteAllocation {
    pub fn new(
        allocation_type: QuoteAllocationType,
        asset: &AssetRef,
        native_amount: impl Into<String>,
    ) -> Self {
        Self {
            allocation_type,
            plugin_id: asset.plugin_id.clone(),
            currency_code: asset.currency_code.clone(),
            native_amount: native_amount.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PositionAllocationType {
    Staked,
    Earned,
    Unstaked,
}

/// One component of a live staking position. An `Unstaked` allocation with
/// a `locktime` is still unbonding and becomes claimable at that time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionAllocation {
    pub plugin_id: String,
    pub currency_code: String,
    pub allocation_type: PositionAllocationType,
    pub native_amount: String,
    pub locktime: Option<DateTime<Utc>>,
}

impl PositionAllocation {
    pub fn new(
        allocation_type: PositionAllocationType,
        asset: &AssetRef,
        native_amount: impl Into<String>,
    ) -> Self {
        Self {
            plugin_id: asset.plugin_id.clone(),
            currency_code: asset.currency_code.clone(),
            allocation_type,
            native_amount: native_amount.into(),
            locktime: None,
        }
    }

    pub fn with_locktime(mut self, locktime: DateTime<Utc>) -> Self {
        self.locktime = Some(locktime);
        self
    }
}
