//! JSON-RPC 2.0 wire types and the HTTP transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use liraindex_core::error::IndexerError;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap `result`, turning a node-side error into [`TransportError::Rpc`].
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, TransportError> {
        if let Some(err) = self.error {
            return Err(TransportError::Rpc { code: err.code, message: err.message });
        }
        let result = self.result.unwrap_or(Value::Null);
        Ok(serde_json::from_value(result)?)
    }
}

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, bad status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC error returned by the node.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}

impl TransportError {
    /// Returns `true` if the same request may succeed later.
    ///
    /// Node-side JSON-RPC errors count: rate limits and lagging backends
    /// report through them. A response that does not deserialize will not
    /// change on resend.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Deserialization(_))
    }
}

impl From<TransportError> for IndexerError {
    fn from(e: TransportError) -> Self {
        if e.is_retryable() {
            IndexerError::Rpc(e.to_string())
        } else {
            IndexerError::Decode(e.to_string())
        }
    }
}

/// HTTP JSON-RPC transport backed by `reqwest`.
///
/// Retries are the caller's business; every call is a single attempt.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            http,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and deserialize its result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout { ms: self.timeout.as_millis() as u64 }
                } else {
                    TransportError::Http(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        tracing::trace!(method, url = %self.url, "rpc call complete");
        body.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes() {
        let req = JsonRpcRequest::new(7, "eth_blockNumber", vec![]);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v, json!({"jsonrpc": "2.0", "method": "eth_blockNumber", "params": [], "id": 7}));
    }

    #[test]
    fn response_result_and_error() {
        let ok: JsonRpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"})).unwrap();
        assert_eq!(ok.into_result::<String>().unwrap(), "0x10");

        let err: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32005, "message": "query returned more than 10000 results"}
        }))
        .unwrap();
        let e = err.into_result::<String>().unwrap_err();
        assert!(e.is_retryable());
        assert!(e.to_string().contains("-32005"));
    }

    #[test]
    fn transport_error_classification() {
        let e: IndexerError = TransportError::Http("connection refused".into()).into();
        assert!(e.is_transient());
        let e: IndexerError = TransportError::Timeout { ms: 30_000 }.into();
        assert!(e.is_transient());

        let bad = serde_json::from_str::<Value>("{not json").unwrap_err();
        let transport = TransportError::from(bad);
        assert!(!transport.is_retryable());
        let e: IndexerError = transport.into();
        assert!(matches!(e, IndexerError::Decode(_)));
        assert!(!e.is_transient());
    }
}
