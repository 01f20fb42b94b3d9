//! Typed clients for the Thorchain indexers the savers protocol uses.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use stakeport_common::errors::{Result, StakeError};
use stakeport_common::utils::cache::TtlCache;
use stakeport_common::utils::fetch;

use crate::exchange::ExchangeInfoService;

const INBOUND_ADDRESS_TTL: Duration = Duration::from_secs(300);

/// One chain's vault entry from `/thorchain/inbound_addresses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundAddress {
    pub chain: String,
    pub address: String,
    pub router: Option<String>,
    #[serde(default)]
    pub halted: bool,
    pub gas_rate: Option<String>,
    pub dust_threshold: Option<String>,
}

/// One saver's standing in a pool, from `/thorchain/pool/{asset}/saver/…`
/// and the pool-wide savers listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaverPosition {
    pub asset: String,
    pub asset_address: String,
    pub units: String,
    pub asset_deposit_value: String,
    pub asset_redeem_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteFees {
    pub slippage_bps: Option<u32>,
    pub outbound: Option<String>,
    pub total: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaverDepositQuote {
    pub inbound_address: String,
    pub expected_amount_deposit: String,
    pub fees: QuoteFees,
    pub memo: String,
    pub dust_threshold: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaverWithdrawQuote {
    pub inbound_address: String,
    pub expected_amount_out: String,
    pub fees: QuoteFees,
    pub dust_amount: Option<String>,
}

pub struct ThornodeClient {
    client: Client,
    exchange: Arc<ExchangeInfoService>,
    inbound_cache: TtlCache<Vec<InboundAddress>>,
}

impl ThornodeClient {
    pub fn new(exchange: Arc<ExchangeInfoService>) -> Self {
        Self {
            client: Client::new(),
            exchange,
            inbound_cache: TtlCache::new(INBOUND_ADDRESS_TTL),
        }
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value> {
        let servers = self.exchange.get().await.thornode_servers;
        fetch::waterfall_get(
            &self.client,
            &fetch::shuffled(&servers),
            path,
            fetch::FETCH_TIMEOUT,
        )
        .await
    }

    /// Per-chain vault addresses, cached on a TTL. Many concurrent quote
    /// requests read this; a refresh failure keeps the previous list.
    pub async fn inbound_addresses(&self) -> Result<Vec<InboundAddress>> {
        self.inbound_cache
            .get_or_refresh(|| async {
                let body = self.get("/thorchain/inbound_addresses").await?;
                Ok(serde_json::from_value(body)?)
            })
            .await
    }

    /// The vault entry for one chain, rejecting halted chains outright.
    pub async fn inbound_address_for(&self, chain: &str) -> Result<InboundAddress> {
        let addresses = self.inbound_addresses().await?;
        let entry = addresses
            .into_iter()
            .find(|entry| entry.chain == chain)
            .ok_or_else(|| StakeError::Config(format!("no inbound address for chain {chain}")))?;
        if entry.halted {
            return Err(StakeError::UnsupportedOperation(format!(
                "trading on {chain} is currently halted"
            )));
        }
        Ok(entry)
    }

    pub async fn saver_position(
        &self,
        pool_asset: &str,
        address: &str,
    ) -> Result<Option<SaverPosition>> {
        match self
            .get(&format!("/thorchain/pool/{pool_asset}/saver/{address}"))
            .await
        {
            Ok(body) => Ok(Some(serde_json::from_value(body)?)),
            // Thornode answers 404 for an address with no position.
            Err(StakeError::Api { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Every saver in a pool. Only the head of the list is ever inspected;
    /// callers cap their own scans.
    pub async fn savers(&self, pool_asset: &str) -> Result<Vec<SaverPosition>> {
        let body = self.get(&format!("/thorchain/pool/{pool_asset}/savers")).await?;
        Ok(serde_json::from_value(body)?)
    }

    pub async fn deposit_quote(
        &self,
        pool_asset: &str,
        native_amount: &str,
    ) -> Result<SaverDepositQuote> {
        let body = self
            .get(&format!(
                "/thorchain/quote/saver/deposit?asset={pool_asset}&amount={native_amount}"
            ))
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    pub async fn withdraw_quote(
        &self,
        pool_asset: &str,
        address: &str,
        basis_points: u32,
    ) -> Result<SaverWithdrawQuote> {
        let body = self
            .get(&format!(
                "/thorchain/quote/saver/withdraw?asset={pool_asset}&address={address}&withdraw_bps={basis_points}"
            ))
            .await?;
        Ok(serde_json::from_value(body)?)
    }
}

/// Midgard answers the history-flavored questions Thornode does not.
pub struct MidgardClient {
    client: Client,
    exchange: Arc<ExchangeInfoService>,
}

impl MidgardClient {
    pub fn new(exchange: Arc<ExchangeInfoService>) -> Self {
        Self {
            client: Client::new(),
            exchange,
        }
    }

    /// The pool's savers APR as a percentage.
    pub async fn savers_apr(&self, pool_asset: &str) -> Result<f64> {
        let servers = self.exchange.get().await.midgard_servers;
        let body = fetch::waterfall_get(
            &self.client,
            &fetch::shuffled(&servers),
            &format!("/v2/pool/{pool_asset}"),
            fetch::FETCH_TIMEOUT,
        )
        .await?;
        let fraction = body
            .get("saversAPR")
            .and_then(|value| match value {
                serde_json::Value::Number(number) => number.as_f64(),
                serde_json::Value::String(text) => text.parse().ok(),
                _ => None,
            })
            .unwrap_or(0.0);
        Ok(fraction * 100.0)
    }
}
