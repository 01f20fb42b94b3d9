//! Value types shared across plugins and adapters

mod allocation;
mod asset;
mod policy;
mod position;
mod quote;
mod request;
mod yields;

pub use allocation::{
    PositionAllocation, PositionAllocationType, QuoteAllocation, QuoteAllocationType,
};
pub use asset::AssetRef;
pub use policy::{PolicyFlags, StakePolicy, StakeProviderInfo, StakeWarnings};
pub use position::StakePosition;
pub use quote::{ApprovePlan, ChangeQuote, QuoteInfo};
pub use request::{ChangeQuoteRequest, PolicyFilter, StakeAction, StakePositionRequest};
pub use yields::{YieldInfo, YieldType};
