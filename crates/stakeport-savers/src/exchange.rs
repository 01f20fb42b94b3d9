//! Exchange-info service: which Thorchain indexer servers to talk to.
//!
//! The list comes from the host's info server and refreshes on a TTL.
//! A refresh failure keeps the previous list; an unreachable info server
//! at startup falls back to the compiled-in defaults.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use stakeport_common::utils::cache::TtlCache;
use stakeport_common::utils::fetch;

const EXCHANGE_INFO_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    pub thornode_servers: Vec<String>,
    pub midgard_servers: Vec<String>,
}

impl Default for ExchangeInfo {
    fn default() -> Self {
        Self {
            thornode_servers: vec!["https://thornode.ninerealms.com".to_string()],
            midgard_servers: vec!["https://midgard.ninerealms.com".to_string()],
        }
    }
}

pub struct ExchangeInfoService {
    client: Client,
    info_servers: Vec<String>,
    cache: TtlCache<ExchangeInfo>,
}

impl ExchangeInfoService {
    pub fn new(info_servers: Vec<String>) -> Self {
        Self {
            client: Client::new(),
            info_servers,
            cache: TtlCache::new(EXCHANGE_INFO_TTL),
        }
    }

    /// The current server lists. Never fails: a cold cache with an
    /// unreachable info server serves the compiled-in defaults.
    pub async fn get(&self) -> ExchangeInfo {
        let outcome = self
            .cache
            .get_or_refresh(|| async {
                let body = fetch::waterfall_get(
                    &self.client,
                    &self.info_servers,
                    "v1/exchangeInfo",
                    fetch::FETCH_TIMEOUT,
                )
                .await?;
                Ok(serde_json::from_value(body)?)
            })
            .await;
        match outcome {
            Ok(info) => info,
            Err(err) => {
                warn!("exchange info unavailable, using default servers: {err}");
                ExchangeInfo::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_info_server_falls_back_to_defaults() {
        let service = ExchangeInfoService::new(Vec::new());
        let info = service.get().await;
        assert!(!info.thornode_servers.is_empty());
        assert!(!info.midgard_servers.is_empty());
    }
}
