//! Error types for the stakeport system

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StakeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Insufficient {currency_code} balance for requested operation")]
    InsufficientFunds { currency_code: String },

    #[error("Amount is below the protocol minimum")]
    BelowLimit,

    #[error("Pool has reached its capacity")]
    PoolFull,

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unknown stake policy: {0}")]
    UnknownPolicy(String),

    #[error("Asset {plugin_id}:{currency_code} is not part of this policy")]
    AssetMismatch {
        plugin_id: String,
        currency_code: String,
    },

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid native amount: {0}")]
    Amount(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StakeError {
    /// Maps a protocol's textual error field onto a typed error where the
    /// message is recognized, keeping the raw payload otherwise.
    pub fn from_protocol_message(status: u16, body: &str) -> Self {
        let lower = body.to_lowercase();
        if lower.contains("not enough fee") || lower.contains("below minimum") {
            StakeError::BelowLimit
        } else if lower.contains("synth supply over target") || lower.contains("capacity") {
            StakeError::PoolFull
        } else {
            StakeError::Api {
                status,
                body: body.to_string(),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, StakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_message_mapping() {
        assert!(matches!(
            StakeError::from_protocol_message(400, "deposit is below minimum"),
            StakeError::BelowLimit
        ));
        assert!(matches!(
            StakeError::from_protocol_message(400, "synth supply over target"),
            StakeError::PoolFull
        ));
        match StakeError::from_protocol_message(500, "internal error") {
            StakeError::Api { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "internal error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
