use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::allocation::QuoteAllocation;
use crate::errors::Result;

/// Extra quote information surfaced to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteInfo {
    pub break_even_days: Option<f64>,
}

/// The side-effecting half of a quote. `execute` replays the planned
/// transactions against the live chain, strictly in order.
#[async_trait]
pub trait ApprovePlan: Send + Sync {
    async fn execute(&self) -> Result<()>;
}

/// A planned staking change: the allocations describing what will move,
/// plus the transactions that will move it.
pub struct ChangeQuote {
    pub allocations: Vec<QuoteAllocation>,
    pub quote_info: Option<QuoteInfo>,
    plan: Box<dyn ApprovePlan>,
}

impl ChangeQuote {
    pub fn new(
        allocations: Vec<QuoteAllocation>,
        quote_info: Option<QuoteInfo>,
        plan: Box<dyn ApprovePlan>,
    ) -> Self {
        Self {
            allocations,
            quote_info,
            plan,
        }
    }

    /// Commits the quote. Consumes `self`: broadcasting the same quote
    /// twice would double-spend, so a committed quote cannot be approved
    /// again.
    pub async fn approve(self) -> Result<()> {
        self.plan.execute().await
    }
}

impl fmt::Debug for ChangeQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeQuote")
            .field("allocations", &self.allocations)
            .field("quote_info", &self.quote_info)
            .finish_non_exhaustive()
    }
}
