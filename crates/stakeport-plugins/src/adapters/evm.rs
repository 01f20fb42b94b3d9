//! Minimal EVM JSON-RPC plumbing shared by the on-chain adapters.
//!
//! Covers exactly what quote construction needs: view calls, gas and nonce
//! queries, receipt polling, selector-based call data, and an ordered
//! transaction pipeline whose later steps can consume values emitted by
//! earlier transactions' logs.

use async_trait::async_trait;
use ethnum::U256;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use stakeport_common::errors::{Result, StakeError};
use stakeport_common::types::ApprovePlan;
use stakeport_common::utils::{amount, fetch};
use stakeport_common::wallet::{SpendInfo, SpendTarget, StakeWallet};

const RPC_TIMEOUT: Duration = Duration::from_secs(5);
const RECEIPT_ATTEMPTS: u32 = 30;
const RECEIPT_DELAY: Duration = Duration::from_secs(4);

// ERC-20 selectors and topics used across adapters.
pub const SEL_APPROVE: &str = "095ea7b3"; // approve(address,uint256)
pub const SEL_ALLOWANCE: &str = "dd62ed3e"; // allowance(address,address)
pub const SEL_BALANCE_OF: &str = "70a08231"; // balanceOf(address)
pub const TOPIC_TRANSFER: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"; // Transfer(address,address,uint256)

/// JSON-RPC client over one or more equivalent endpoints.
pub struct EvmRpc {
    client: Client,
    rpc_urls: Vec<String>,
    /// Gas-limit safety factor for chains with unreliable estimation.
    gas_multiplier: u64,
}

impl EvmRpc {
    pub fn new(rpc_urls: Vec<String>, gas_multiplier: u64) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(StakeError::Config("no RPC endpoints configured".to_string()));
        }
        if gas_multiplier == 0 {
            return Err(StakeError::Config("gas multiplier must be at least 1".to_string()));
        }
        Ok(Self {
            client: Client::new(),
            rpc_urls,
            gas_multiplier,
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response =
            fetch::waterfall_post(&self.client, &self.rpc_urls, "", &body, RPC_TIMEOUT).await?;
        if let Some(error) = response.get("error") {
            return Err(StakeError::Api {
                status: 200,
                body: error.to_string(),
            });
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| StakeError::Api {
                status: 200,
                body: format!("{method} returned no result"),
            })
    }

    /// A view call, returning the raw hex result.
    pub async fn eth_call(&self, to: &str, calldata: &str) -> Result<String> {
        let result = self
            .request(
                "eth_call",
                json!([{ "to": to, "data": format!("0x{calldata}") }, "latest"]),
            )
            .await?;
        result
            .as_str()
            .map(|s| s.trim_start_matches("0x").to_string())
            .ok_or_else(|| StakeError::Api {
                status: 200,
                body: "eth_call returned a non-string result".to_string(),
            })
    }

    /// Current gas price, decimal string in wei.
    pub async fn gas_price(&self) -> Result<String> {
        let result = self.request("eth_gasPrice", json!([])).await?;
        hex_value_to_decimal(&result)
    }

    pub async fn transaction_count(&self, address: &str) -> Result<u64> {
        let result = self
            .request("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        let decimal = hex_value_to_decimal(&result)?;
        decimal
            .parse::<u64>()
            .map_err(|_| StakeError::Amount(decimal))
    }

    /// Gas estimate already widened by the chain's safety multiplier.
    /// Falls back to `default_gas` when the node refuses to estimate, which
    /// happens routinely for transactions that depend on an approval that
    /// has not landed yet.
    pub async fn padded_gas_estimate(
        &self,
        from: &str,
        to: &str,
        value: &str,
        calldata: &str,
        default_gas: u64,
    ) -> Result<String> {
        let params = json!([{
            "from": from,
            "to": to,
            "value": decimal_to_hex(value)?,
            "data": format!("0x{calldata}"),
        }]);
        let estimate = match self.request("eth_estimateGas", params).await {
            Ok(result) => hex_value_to_decimal(&result)?,
            Err(err) => {
                debug!("gas estimation failed for call to {to}, using default: {err}");
                default_gas.to_string()
            }
        };
        amount::mul(&estimate, self.gas_multiplier)
    }

    pub async fn erc20_balance(&self, token: &str, owner: &str) -> Result<String> {
        let calldata = calldata(SEL_BALANCE_OF, &[encode_address(owner)?]);
        let word = self.eth_call(token, &calldata).await?;
        hex_to_decimal(&word)
    }

    pub async fn erc20_allowance(&self, token: &str, owner: &str, spender: &str) -> Result<String> {
        let calldata = calldata(
            SEL_ALLOWANCE,
            &[encode_address(owner)?, encode_address(spender)?],
        );
        let word = self.eth_call(token, &calldata).await?;
        hex_to_decimal(&word)
    }

    /// Polls for a transaction receipt until the chain confirms it.
    pub async fn wait_for_receipt(&self, txid: &str) -> Result<Value> {
        for _ in 0..RECEIPT_ATTEMPTS {
            let result = self
                .request("eth_getTransactionReceipt", json!([txid]))
                .await?;
            if !result.is_null() {
                return Ok(result);
            }
            tokio::time::sleep(RECEIPT_DELAY).await;
        }
        Err(StakeError::Other(anyhow::anyhow!(
            "transaction {txid} was not confirmed in time"
        )))
    }
}

// --- ABI helpers ------------------------------------------------------

/// A left-padded 32-byte word for an address argument.
pub fn encode_address(address: &str) -> Result<String> {
    let stripped = address.trim_start_matches("0x").to_lowercase();
    if hex::decode(&stripped).is_err() || stripped.len() != 40 {
        return Err(StakeError::Config(format!("invalid address: {address}")));
    }
    Ok(format!("{stripped:0>64}"))
}

/// A 32-byte word for a decimal-string amount.
pub fn encode_amount(amount_dec: &str) -> Result<String> {
    let value = amount::parse(amount_dec)?;
    Ok(format!("{value:0>64x}"))
}

/// The all-ones word, used for unlimited allowances.
pub fn encode_max_amount() -> String {
    "f".repeat(64)
}

pub fn calldata(selector: &str, words: &[String]) -> String {
    let mut out = selector.to_string();
    for word in words {
        out.push_str(word);
    }
    out
}

/// Minimal `0x`-prefixed hex for a decimal amount (RPC value fields).
pub fn decimal_to_hex(amount_dec: &str) -> Result<String> {
    let value = amount::parse(amount_dec)?;
    Ok(format!("{value:#x}"))
}

pub fn hex_to_decimal(word: &str) -> Result<String> {
    let stripped = word.trim_start_matches("0x");
    if stripped.is_empty() {
        return Ok("0".to_string());
    }
    U256::from_str_radix(stripped, 16)
        .map(|value| value.to_string())
        .map_err(|_| StakeError::Amount(word.to_string()))
}

fn hex_value_to_decimal(value: &Value) -> Result<String> {
    let text = value.as_str().ok_or_else(|| StakeError::Api {
        status: 200,
        body: format!("expected a hex quantity, got {value}"),
    })?;
    hex_to_decimal(text)
}

/// The 32-byte words of a returned buffer, as decimal strings.
pub fn decode_words(data: &str) -> Result<Vec<String>> {
    let stripped = data.trim_start_matches("0x");
    if !stripped.is_ascii() || stripped.len() % 64 != 0 {
        return Err(StakeError::Amount(format!(
            "malformed ABI buffer of length {}",
            stripped.len()
        )));
    }
    let mut words = Vec::with_capacity(stripped.len() / 64);
    let mut rest = stripped;
    while !rest.is_empty() {
        let (word, tail) = rest.split_at(64);
        words.push(hex_to_decimal(word)?);
        rest = tail;
    }
    Ok(words)
}

// --- Transaction pipeline ---------------------------------------------

/// What a confirmed step makes available to the step after it.
#[derive(Debug, Clone, Default)]
pub struct TxReceipt {
    pub txid: String,
    pub outputs: HashMap<String, String>,
}

/// Pulls one 32-byte word out of a matching log once the step confirms, so
/// a later step can spend an amount only the chain knows (e.g. the exact
/// LP token amount a pool minted).
#[derive(Debug, Clone)]
pub struct LogExport {
    pub topic0: String,
    pub word_index: usize,
    pub name: String,
}

/// One step of an ordered transaction pipeline.
#[derive(Debug, Clone)]
pub struct PlannedTx {
    pub label: String,
    pub to: String,
    /// Native value attached to the call, decimal smallest units.
    pub value: String,
    pub calldata: String,
    pub gas_limit: String,
    pub gas_price: String,
    /// Replace the final calldata word with this named receipt output
    /// before signing. The step must follow one exporting that name.
    pub amount_from_receipt: Option<String>,
    pub export: Option<LogExport>,
}

impl PlannedTx {
    pub fn call(label: impl Into<String>, to: impl Into<String>, calldata: String) -> Self {
        Self {
            label: label.into(),
            to: to.into(),
            value: "0".to_string(),
            calldata,
            gas_limit: "0".to_string(),
            gas_price: "0".to_string(),
            amount_from_receipt: None,
            export: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_gas(mut self, gas_limit: String, gas_price: String) -> Self {
        self.gas_limit = gas_limit;
        self.gas_price = gas_price;
        self
    }

    pub fn with_receipt_amount(mut self, name: impl Into<String>) -> Self {
        self.amount_from_receipt = Some(name.into());
        self
    }

    pub fn with_export(mut self, export: LogExport) -> Self {
        self.export = Some(export);
        self
    }

    pub fn fee(&self) -> Result<String> {
        amount::mul_div(&self.gas_limit, &self.gas_price, "1")
    }
}

/// The summed gas cost of every step in a pipeline.
pub fn total_fee(txs: &[PlannedTx]) -> Result<String> {
    let mut total = "0".to_string();
    for tx in txs {
        total = amount::add(&total, &tx.fee()?)?;
    }
    Ok(total)
}

/// Executes a pipeline strictly in order against the live chain. The nonce
/// advances monotonically per signer so back-to-back submissions cannot
/// collide, and receipts are threaded into steps that declared a
/// dependency on them.
pub struct EvmPlan {
    pub rpc: Arc<EvmRpc>,
    pub wallet: Arc<dyn StakeWallet>,
    pub signer_address: String,
    pub token_id: Option<String>,
    pub txs: Vec<PlannedTx>,
}

#[async_trait]
impl ApprovePlan for EvmPlan {
    async fn execute(&self) -> Result<()> {
        let mut nonce = self.rpc.transaction_count(&self.signer_address).await?;
        let mut previous: Option<TxReceipt> = None;

        for tx in &self.txs {
            let mut calldata = tx.calldata.clone();
            if let Some(name) = &tx.amount_from_receipt {
                let receipt = previous.as_ref().ok_or_else(|| {
                    StakeError::Other(anyhow::anyhow!(
                        "step {} depends on a prior receipt but none exists",
                        tx.label
                    ))
                })?;
                let value = receipt.outputs.get(name).ok_or_else(|| {
                    StakeError::Other(anyhow::anyhow!(
                        "step {} needs receipt output {name}, which the prior step did not export",
                        tx.label
                    ))
                })?;
                calldata = replace_last_word(&calldata, value)?;
            }

            let spend = SpendInfo {
                token_id: self.token_id.clone(),
                spend_targets: vec![SpendTarget {
                    public_address: tx.to.clone(),
                    native_amount: tx.value.clone(),
                    memo: None,
                }],
                other_params: Some(json!({
                    "data": format!("0x{calldata}"),
                    "gasLimit": tx.gas_limit,
                    "gasPrice": tx.gas_price,
                    "nonce": nonce,
                })),
            };

            let unsigned = self.wallet.make_spend(&spend).await?;
            let signed = self.wallet.sign_tx(&unsigned).await?;
            let txid = self.wallet.broadcast_tx(&signed).await?;
            self.wallet.save_tx(&signed).await?;
            debug!("broadcast step {} as {txid}", tx.label);

            previous = Some(match &tx.export {
                Some(export) => {
                    let receipt = self.rpc.wait_for_receipt(&txid).await?;
                    extract_export(export, &receipt, txid)?
                }
                None => TxReceipt {
                    txid,
                    outputs: HashMap::new(),
                },
            });
            nonce += 1;
        }
        Ok(())
    }
}

fn extract_export(export: &LogExport, receipt: &Value, txid: String) -> Result<TxReceipt> {
    let logs = receipt
        .get("logs")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for log in &logs {
        let topic0 = log
            .get("topics")
            .and_then(Value::as_array)
            .and_then(|topics| topics.first())
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !topic0.eq_ignore_ascii_case(&export.topic0) {
            continue;
        }
        let data = log.get("data").and_then(Value::as_str).unwrap_or_default();
        let words = decode_words(data)?;
        if let Some(word) = words.get(export.word_index) {
            let mut outputs = HashMap::new();
            outputs.insert(export.name.clone(), word.clone());
            return Ok(TxReceipt { txid, outputs });
        }
    }
    warn!("no log matching {} in receipt for {txid}", export.topic0);
    Err(StakeError::Other(anyhow::anyhow!(
        "receipt for {txid} did not contain the expected {} log",
        export.name
    )))
}

/// Splices a receipt-derived amount into the final argument slot.
fn replace_last_word(calldata: &str, amount_dec: &str) -> Result<String> {
    if calldata.len() < 8 + 64 || (calldata.len() - 8) % 64 != 0 {
        return Err(StakeError::Amount(format!(
            "calldata of length {} has no argument words",
            calldata.len()
        )));
    }
    let head = &calldata[..calldata.len() - 64];
    Ok(format!("{head}{}", encode_amount(amount_dec)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_address() {
        let word = encode_address("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").unwrap();
        assert_eq!(word.len(), 64);
        assert!(word.starts_with("000000000000000000000000a0b86991"));
        assert!(encode_address("0x1234").is_err());
        assert!(encode_address("not-hex").is_err());
    }

    #[test]
    fn test_amount_round_trip() {
        let word = encode_amount("5000000000").unwrap();
        assert_eq!(word.len(), 64);
        assert_eq!(hex_to_decimal(&word).unwrap(), "5000000000");
        assert_eq!(decimal_to_hex("255").unwrap(), "0xff");
        assert_eq!(hex_to_decimal("0x").unwrap(), "0");
    }

    #[test]
    fn test_calldata_assembly() {
        let data = calldata(
            SEL_APPROVE,
            &[
                encode_address("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").unwrap(),
                encode_amount("1000").unwrap(),
            ],
        );
        assert_eq!(data.len(), 8 + 64 + 64);
        assert!(data.starts_with(SEL_APPROVE));
    }

    #[test]
    fn test_replace_last_word() {
        let original = calldata(
            SEL_APPROVE,
            &[
                encode_address("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").unwrap(),
                encode_amount("1").unwrap(),
            ],
        );
        let spliced = replace_last_word(&original, "123456789").unwrap();
        assert_eq!(spliced.len(), original.len());
        assert_eq!(
            hex_to_decimal(&spliced[spliced.len() - 64..]).unwrap(),
            "123456789"
        );
        assert!(replace_last_word(SEL_APPROVE, "1").is_err());
    }

    #[test]
    fn test_decode_words() {
        let buffer = format!(
            "0x{}{}",
            encode_amount("42").unwrap(),
            encode_amount("7").unwrap()
        );
        assert_eq!(decode_words(&buffer).unwrap(), vec!["42", "7"]);
        assert!(decode_words("0xabc").is_err());
    }

    #[test]
    fn test_pipeline_fee_sum() {
        let txs = vec![
            PlannedTx::call("approve", "0xdead", String::new())
                .with_gas("50000".to_string(), "2000000000".to_string()),
            PlannedTx::call("stake", "0xdead", String::new())
                .with_gas("150000".to_string(), "2000000000".to_string()),
        ];
        assert_eq!(total_fee(&txs).unwrap(), "400000000000000");
    }

    #[test]
    fn test_extract_export_reads_log_word() {
        let receipt = serde_json::json!({
            "logs": [
                {
                    "topics": ["0x0000000000000000000000000000000000000000000000000000000000000001"],
                    "data": format!("0x{}", encode_amount("9").unwrap()),
                },
                {
                    "topics": [TOPIC_TRANSFER],
                    "data": format!("0x{}", encode_amount("31337").unwrap()),
                },
            ]
        });
        let export = LogExport {
            topic0: TOPIC_TRANSFER.to_string(),
            word_index: 0,
            name: "liquidity".to_string(),
        };
        let out = extract_export(&export, &receipt, "0xtx".to_string()).unwrap();
        assert_eq!(out.outputs.get("liquidity").unwrap(), "31337");
    }
}
