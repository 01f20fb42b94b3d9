//! Generic staking plugin: a uniform policy/adapter architecture over
//! heterogeneous on-chain staking protocols.
//!
//! Each supported protocol family contributes an adapter; hand-authored
//! policy tables bind adapters to assets and display metadata; the
//! [`GenericStakePlugin`] facade resolves policies at startup and routes
//! quote/position requests to the right adapter.

pub mod adapters;
pub mod info;
pub mod plugin;
pub mod policy;

pub use plugin::GenericStakePlugin;
pub use policy::PolicyConfig;
