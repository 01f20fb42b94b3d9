//! The public surface every staking plugin exposes to the host.

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::Result;
use crate::types::{
    ChangeQuote, ChangeQuoteRequest, PolicyFilter, StakePolicy, StakePosition,
    StakePositionRequest,
};
use crate::wallet::StakeWallet;

/// One protocol family's staking offerings. Constructed once at startup;
/// the host holds plugins as `Arc<dyn StakePlugin>`.
#[async_trait]
pub trait StakePlugin: Send + Sync {
    /// The resolved policy list, optionally narrowed to one wallet's
    /// assets. Returns a fresh Vec; the held list is never mutated.
    fn policies(&self, filter: Option<&PolicyFilter>) -> Vec<StakePolicy>;

    /// Quote a stake/unstake/claim change for one policy. Unknown policy
    /// ids and assets outside the policy are hard errors.
    async fn fetch_change_quote(
        &self,
        wallet: Arc<dyn StakeWallet>,
        request: &ChangeQuoteRequest,
    ) -> Result<ChangeQuote>;

    /// The caller's live position in one policy. Never cached.
    async fn fetch_stake_position(
        &self,
        wallet: Arc<dyn StakeWallet>,
        request: &StakePositionRequest,
    ) -> Result<StakePosition>;
}
