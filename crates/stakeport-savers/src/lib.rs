//! Thorchain Savers staking plugin.
//!
//! Structurally parallel to the generic plugin but standalone: savers
//! vaults speak memo- and amount-encoded messages to per-chain inbound
//! addresses, with a funding step for multi-address wallets whose primary
//! address cannot cover an operation on its own.

pub mod exchange;
pub mod info;
pub mod plugin;
pub mod thornode;

pub use plugin::SaversPlugin;
