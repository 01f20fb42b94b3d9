use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum YieldType {
    Stable,
    Variable,
}

/// Asynchronously resolved yield data attached to a policy at startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YieldInfo {
    pub apy: f64,
    pub yield_type: YieldType,
}

impl Default for YieldInfo {
    fn default() -> Self {
        Self {
            apy: 0.0,
            yield_type: YieldType::Variable,
        }
    }
}
