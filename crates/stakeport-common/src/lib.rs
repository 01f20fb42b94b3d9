//! Shared types and utilities for the stakeport system
//! Everything protocol adapters and plugin facades have in common lives here.

pub mod errors;
pub mod plugin;
pub mod types;
pub mod utils;
pub mod wallet;

pub use errors::{Result, StakeError};
pub use plugin::StakePlugin;
pub use types::*;
pub use wallet::{
    AddressInfo, ReceiveAddress, SignedTx, SpendInfo, SpendPlan, SpendTarget, StakeWallet,
    UnsignedTx,
};
