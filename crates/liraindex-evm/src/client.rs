//! Chain access: head block, ranged log queries and push subscriptions.
//!
//! [`JsonRpcChainClient`] talks to a node with `eth_blockNumber`,
//! `eth_getLogs` and `eth_getBlockByNumber` over HTTP, and with
//! `eth_subscribe("logs")` over WebSocket when a WS endpoint is configured.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use liraindex_core::error::IndexerError;
use liraindex_core::types::{normalize_address, ContractBinding, EventKind, RawLogEvent};

use crate::abi;
use crate::rpc::HttpTransport;
use crate::ws::{WsConfig, WsSubscriber};

/// Block timestamps kept before the cache is reset.
const TIMESTAMP_CACHE_LIMIT: usize = 10_000;

/// Source of decoded logs for the orchestrator.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain head.
    async fn block_number(&self) -> Result<u64, IndexerError>;

    /// Logs of one event emitted by `binding` in `[from, to]`, in chain order.
    async fn query_logs(
        &self,
        binding: &ContractBinding,
        event: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLogEvent>, IndexerError>;

    /// Push delivery of new logs. Errors when the client has no push channel.
    async fn subscribe(
        &self,
        binding: &ContractBinding,
        event: EventKind,
    ) -> Result<mpsc::UnboundedReceiver<RawLogEvent>, IndexerError>;
}

/// A raw EVM log as returned by `eth_getLogs` or a `logs` subscription.
///
/// Pending logs carry nulls for the positional fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    #[serde(rename = "transactionHash")]
    pub tx_hash: Option<String>,
    #[serde(rename = "logIndex")]
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// `(block, tx_hash, log_index)`, or `None` for a pending log.
    fn position(&self) -> Result<Option<(u64, String, u32)>, IndexerError> {
        let (Some(block), Some(tx_hash), Some(index)) =
            (self.block_number.as_deref(), self.tx_hash.as_ref(), self.log_index.as_deref())
        else {
            return Ok(None);
        };
        let index = parse_hex_u64(index)?;
        let log_index = u32::try_from(index)
            .map_err(|_| IndexerError::Decode(format!("logIndex {index} out of range")))?;
        Ok(Some((parse_hex_u64(block)?, tx_hash.clone(), log_index)))
    }
}

/// Parse a hex-encoded quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, IndexerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| IndexerError::Decode(format!("bad hex quantity {s:?}: {e}")))
}

/// `eth_getLogs` / `eth_subscribe` filter for one contract event.
fn log_filter(binding: &ContractBinding, event: EventKind, range: Option<(u64, u64)>) -> Value {
    let mut filter = json!({
        "address": binding.address,
        "topics": [abi::topic0_hex(event)],
    });
    if let Some((from, to)) = range {
        filter["fromBlock"] = json!(format!("0x{from:x}"));
        filter["toBlock"] = json!(format!("0x{to:x}"));
    }
    filter
}

/// Turns wire logs into [`RawLogEvent`]s, fetching block timestamps as needed.
struct LogDecoder {
    http: HttpTransport,
    timestamps: Mutex<HashMap<u64, i64>>,
}

impl LogDecoder {
    async fn block_timestamp(&self, number: u64) -> Result<i64, IndexerError> {
        if let Some(ts) = self.cached(number) {
            return Ok(ts);
        }
        let block: Option<Value> = self
            .http
            .call("eth_getBlockByNumber", vec![json!(format!("0x{number:x}")), json!(false)])
            .await?;
        let ts = match block.as_ref().and_then(|b| b["timestamp"].as_str()) {
            Some(t) => parse_hex_u64(t)? as i64,
            None => 0,
        };

        let mut cache = self.timestamps.lock().unwrap_or_else(|p| p.into_inner());
        if cache.len() >= TIMESTAMP_CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(number, ts);
        Ok(ts)
    }

    fn cached(&self, number: u64) -> Option<i64> {
        self.timestamps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&number)
            .copied()
    }

    /// Decode one log. `Ok(None)` means the log is skipped (removed, pending or undecodable).
    async fn decode(&self, event: EventKind, raw: RawLog) -> Result<Option<RawLogEvent>, IndexerError> {
        if raw.is_removed() {
            return Ok(None);
        }
        let Some((block_number, tx_hash, log_index)) = raw.position()? else {
            return Ok(None);
        };
        let args = match abi::decode_log(event, &raw.topics, &raw.data) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(
                    event = %event,
                    tx_hash = %tx_hash,
                    log_index,
                    error = %e,
                    "undecodable log skipped"
                );
                return Ok(None);
            }
        };
        Ok(Some(RawLogEvent {
            contract_address: normalize_address(&raw.address),
            event,
            args,
            tx_hash,
            block_number,
            block_timestamp: self.block_timestamp(block_number).await?,
            log_index,
        }))
    }
}

/// [`ChainClient`] over a JSON-RPC node.
pub struct JsonRpcChainClient {
    decoder: Arc<LogDecoder>,
    ws: Option<WsSubscriber>,
}

impl JsonRpcChainClient {
    /// HTTP-only client. `subscribe` will fail and the orchestrator relies on polling.
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Result<Self, IndexerError> {
        Ok(Self {
            decoder: Arc::new(LogDecoder {
                http: HttpTransport::new(rpc_url, timeout)?,
                timestamps: Mutex::new(HashMap::new()),
            }),
            ws: None,
        })
    }

    /// Enable push subscriptions over `ws_url`.
    pub fn with_ws(mut self, ws_url: impl Into<String>, config: WsConfig) -> Self {
        self.ws = Some(WsSubscriber::connect(ws_url, config));
        self
    }

    pub fn rpc_url(&self) -> &str {
        self.decoder.http.url()
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        let hex: String = self.decoder.http.call("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex)
    }

    async fn query_logs(
        &self,
        binding: &ContractBinding,
        event: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLogEvent>, IndexerError> {
        let raw: Vec<RawLog> = self
            .decoder
            .http
            .call("eth_getLogs", vec![log_filter(binding, event, Some((from, to)))])
            .await?;

        let mut logs = Vec::with_capacity(raw.len());
        for log in raw {
            if let Some(decoded) = self.decoder.decode(event, log).await? {
                logs.push(decoded);
            }
        }
        logs.sort_by_key(|l| l.order_key());
        tracing::debug!(
            contract = %binding.kind,
            event = %event,
            from,
            to,
            logs = logs.len(),
            "eth_getLogs"
        );
        Ok(logs)
    }

    async fn subscribe(
        &self,
        binding: &ContractBinding,
        event: EventKind,
    ) -> Result<mpsc::UnboundedReceiver<RawLogEvent>, IndexerError> {
        let ws = self
            .ws
            .as_ref()
            .ok_or_else(|| IndexerError::Rpc("no WebSocket endpoint configured".into()))?;
        let mut notifications = ws
            .subscribe(vec![json!("logs"), log_filter(binding, event, None)])
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let decoder = self.decoder.clone();
        let contract = binding.kind;
        tokio::spawn(async move {
            while let Some(value) = notifications.recv().await {
                let raw: RawLog = match serde_json::from_value(value) {
                    Ok(raw) => raw,
                    Err(e) => {
                        tracing::warn!(contract = %contract, event = %event, error = %e, "malformed log notification");
                        continue;
                    }
                };
                match decoder.decode(event, raw).await {
                    Ok(Some(log)) => {
                        if tx.send(log).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // polling picks the log up later
                        tracing::warn!(contract = %contract, event = %event, error = %e, "live log dropped");
                    }
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1").unwrap(), 1);
        assert_eq!(parse_hex_u64("0xff").unwrap(), 255);
        assert_eq!(parse_hex_u64("1234").unwrap(), 0x1234);
        assert!(matches!(parse_hex_u64("0xzz"), Err(IndexerError::Decode(_))));
        assert!(parse_hex_u64("").is_err());
    }

    #[test]
    fn raw_log_from_node_json() {
        let log: RawLog = serde_json::from_value(json!({
            "address": "0xAbC0000000000000000000000000000000000001",
            "topics": [],
            "data": "0x",
            "blockNumber": "0x12a05f200",
            "blockHash": "0x00",
            "transactionHash": "0xfeed",
            "logIndex": "0x5",
            "removed": false
        }))
        .unwrap();
        assert!(!log.is_removed());
        assert_eq!(
            log.position().unwrap(),
            Some((5_000_000_000, "0xfeed".to_string(), 5))
        );
    }

    #[test]
    fn pending_log_has_no_position() {
        let log: RawLog = serde_json::from_value(json!({
            "address": "0x01",
            "topics": [],
            "data": "0x",
            "blockNumber": null,
            "transactionHash": null,
            "logIndex": null
        }))
        .unwrap();
        assert_eq!(log.position().unwrap(), None);
    }

    #[test]
    fn malformed_position_is_a_decode_error() {
        let log = |block: &str, index: &str| -> RawLog {
            serde_json::from_value(json!({
                "address": "0x01",
                "topics": [],
                "data": "0x",
                "blockNumber": block,
                "transactionHash": "0xfeed",
                "logIndex": index
            }))
            .unwrap()
        };
        assert!(matches!(log("0xnope", "0x0").position(), Err(IndexerError::Decode(_))));
        assert!(matches!(log("0x10", "0x100000000").position(), Err(IndexerError::Decode(_))));
        assert_eq!(log("0x10", "0xffffffff").position().unwrap().unwrap().2, u32::MAX);
    }

    #[test]
    fn filter_shape() {
        let binding = ContractBinding {
            kind: liraindex_core::types::ContractKind::LiraToken,
            address: "0xaa".into(),
            events: vec![EventKind::Transfer],
        };
        let f = log_filter(&binding, EventKind::Transfer, Some((16, 31)));
        assert_eq!(f["fromBlock"], "0x10");
        assert_eq!(f["toBlock"], "0x1f");
        assert_eq!(f["topics"][0], abi::topic0_hex(EventKind::Transfer));

        let live = log_filter(&binding, EventKind::Transfer, None);
        assert!(live.get("fromBlock").is_none());
    }

    #[tokio::test]
    async fn subscribe_without_ws_fails() {
        let client = JsonRpcChainClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let binding = ContractBinding {
            kind: liraindex_core::types::ContractKind::LiraToken,
            address: "0xaa".into(),
            events: vec![EventKind::Transfer],
        };
        let err = client.subscribe(&binding, EventKind::Transfer).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn subscribe_resolves_with_unreachable_ws() {
        let client = JsonRpcChainClient::new("http://127.0.0.1:1", Duration::from_secs(1))
            .unwrap()
            .with_ws("ws://127.0.0.1:1", WsConfig::default());
        let binding = ContractBinding {
            kind: liraindex_core::types::ContractKind::LiraToken,
            address: "0xaa".into(),
            events: vec![EventKind::Transfer],
        };
        let resolved = tokio::time::timeout(
            Duration::from_secs(5),
            client.subscribe(&binding, EventKind::Transfer),
        )
        .await;
        assert!(matches!(resolved, Ok(Ok(_))));
    }
}
