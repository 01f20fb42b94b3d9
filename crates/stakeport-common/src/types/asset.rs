use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a chain-native or token asset by the chain plugin that hosts
/// it and its currency code. Compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
    pub plugin_id: String,
    pub currency_code: String,
}

impl AssetRef {
    pub fn new(plugin_id: impl Into<String>, currency_code: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            currency_code: currency_code.into(),
        }
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plugin_id, self.currency_code)
    }
}
