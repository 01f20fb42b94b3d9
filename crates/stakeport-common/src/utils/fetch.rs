//! Waterfall HTTP fetch.
//!
//! Candidate servers are tried one at a time with a per-attempt timeout;
//! the first success wins and the rest are never contacted. This is the
//! system's only retry mechanism.

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::errors::{Result, StakeError};

/// Per-attempt timeout applied when the caller has no better number.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// A copy of the server list in random order, for spreading load across
/// equivalent mirrors.
pub fn shuffled(servers: &[String]) -> Vec<String> {
    let mut out = servers.to_vec();
    fastrand::shuffle(&mut out);
    out
}

pub async fn waterfall_get(
    client: &Client,
    servers: &[String],
    path: &str,
    per_attempt: Duration,
) -> Result<Value> {
    waterfall(client, servers, path, None, per_attempt).await
}

pub async fn waterfall_post(
    client: &Client,
    servers: &[String],
    path: &str,
    body: &Value,
    per_attempt: Duration,
) -> Result<Value> {
    waterfall(client, servers, path, Some(body), per_attempt).await
}

async fn waterfall(
    client: &Client,
    servers: &[String],
    path: &str,
    body: Option<&Value>,
    per_attempt: Duration,
) -> Result<Value> {
    if servers.is_empty() {
        return Err(StakeError::Config(format!("no servers configured for {path}")));
    }

    let mut last_error = None;
    for server in servers {
        let url = join_url(server, path);
        let request = match body {
            Some(body) => client.post(&url).json(body),
            None => client.get(&url),
        };
        let outcome = match timeout(per_attempt, request.send()).await {
            Ok(Ok(response)) => take_json(response).await,
            Ok(Err(err)) => Err(StakeError::Http(err)),
            Err(_) => Err(StakeError::Other(anyhow::anyhow!("timed out fetching {url}"))),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!("fetch attempt against {url} failed: {err}");
                last_error = Some(err);
            }
        }
    }
    Err(last_error.expect("at least one server was attempted"))
}

/// Parse a response body as JSON, surfacing non-2xx bodies as typed errors
/// so protocol-reported failure text survives to the caller.
pub async fn take_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(StakeError::from_protocol_message(status.as_u16(), &body));
    }
    Ok(serde_json::from_str(&body)?)
}

fn join_url(server: &str, path: &str) -> String {
    format!(
        "{}/{}",
        server.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://a.example.com/", "/v2/pools"),
            "https://a.example.com/v2/pools"
        );
        assert_eq!(
            join_url("https://a.example.com", "v2/pools"),
            "https://a.example.com/v2/pools"
        );
    }

    #[test]
    fn test_shuffled_preserves_members() {
        let servers: Vec<String> = (0..16).map(|i| format!("https://s{i}.example.com")).collect();
        let mut out = shuffled(&servers);
        out.sort();
        let mut expected = servers.clone();
        expected.sort();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn test_empty_server_list_is_config_error() {
        let client = Client::new();
        let result = waterfall_get(&client, &[], "v2/pools", FETCH_TIMEOUT).await;
        assert!(matches!(result, Err(StakeError::Config(_))));
    }
}
