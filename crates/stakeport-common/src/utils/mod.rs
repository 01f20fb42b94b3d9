//! Small shared utilities: amount arithmetic, HTTP fetch, caching

pub mod amount;
pub mod cache;
pub mod fetch;
