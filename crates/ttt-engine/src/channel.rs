//! Line-delimited JSON-RPC over the engine's stdin and combined output

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace};
use ttt_core::{Result, TttError};

/// Request envelope as written to the engine
#[derive(Debug, Serialize)]
struct PendingRequest<'a> {
    jsonrpc: &'static str,
    id: i64,
    method: &'a str,
    params: &'a Value,
}

/// JSON-RPC error object, parsed leniently
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// First JSON value read after a request
///
/// `result` is `Some(Value::Null)` when the engine sent `"result": null`
/// and `None` when the field was absent.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub id: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<Value>,
}

impl RpcResponse {
    /// Split a parsed line into its envelope fields
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut map) => Self {
                id: map.remove("id"),
                result: map.remove("result"),
                error: map.remove("error").filter(|e| !e.is_null()),
            },
            other => {
                debug!("Engine answered with a non-object JSON value: {}", other);
                Self {
                    id: None,
                    result: None,
                    error: None,
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Structured view of the error field, if it has the standard shape
    pub fn error_object(&self) -> Option<RpcErrorObject> {
        self.error
            .as_ref()
            .and_then(|e| serde_json::from_value(e.clone()).ok())
    }

    /// Human readable description of the error field
    pub fn error_message(&self) -> Option<String> {
        let raw = self.error.as_ref()?;
        Some(match self.error_object() {
            Some(obj) => match &obj.data {
                Some(data) => format!("{} ({}): {}", obj.message, obj.code, data),
                None => format!("{} ({})", obj.message, obj.code),
            },
            None => raw.to_string(),
        })
    }

    /// Result value, or a protocol error when the engine answered with an error or nothing
    pub fn into_result(self) -> Result<Value> {
        if let Some(message) = self.error_message() {
            return Err(TttError::Protocol(format!("RPC error: {}", message)));
        }
        self.result
            .ok_or_else(|| TttError::Protocol("No result in response".into()))
    }
}

/// Synchronous request/response channel to the engine
///
/// Exactly one request may be outstanding. `call` takes `&mut self`, which
/// rules out a second request before the first one returns. A request that
/// timed out can still be answered later, so `call` drops whatever is queued
/// before writing and skips JSON lines whose numeric id is older than the
/// current request. Lines with no id or a newer id are still taken as the
/// answer.
pub struct RpcChannel {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    lines: mpsc::UnboundedReceiver<String>,
    next_id: i64,
    default_timeout: Duration,
}

impl RpcChannel {
    pub fn new<W>(
        writer: W,
        lines: mpsc::UnboundedReceiver<String>,
        default_timeout: Duration,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Box::new(writer),
            lines,
            next_id: 0,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Call with the channel's default timeout
    pub async fn request(&mut self, method: &str, params: Value) -> Result<RpcResponse> {
        let timeout = self.default_timeout;
        self.call(method, params, timeout).await
    }

    /// Send one request and return the first JSON line that follows it
    pub async fn call(
        &mut self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<RpcResponse> {
        self.next_id += 1;
        let id = self.next_id;
        let request = PendingRequest {
            jsonrpc: "2.0",
            id,
            method,
            params: &params,
        };

        // Anything still queued belongs to an earlier, abandoned request
        while let Ok(stale) = self.lines.try_recv() {
            trace!("[engine] dropping stale line: {}", stale.trim());
        }

        let mut json = serde_json::to_string(&request)?;
        debug!("Sending: {}", json);
        json.push('\n');
        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| TttError::Ipc(format!("Write failed: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| TttError::Ipc(format!("Flush failed: {}", e)))?;

        let deadline = Instant::now() + timeout;
        loop {
            let line = match timeout_at(deadline, self.lines.recv()).await {
                Ok(Some(line)) => line,
                Ok(None) => return Err(TttError::EngineClosed),
                Err(_) => return Err(TttError::RpcTimeout(timeout, method.to_string())),
            };

            let trimmed = line.trim();
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => {
                    debug!("Received: {}", trimmed);
                    let response = RpcResponse::from_value(value);
                    match response.id.as_ref().and_then(Value::as_i64) {
                        Some(seen) if seen < id => {
                            debug!("Discarding late response {} while awaiting {}", seen, id);
                            continue;
                        }
                        Some(seen) if seen != id => {
                            debug!("Response id {} does not match request id {}", seen, id)
                        }
                        _ => {}
                    }
                    return Ok(response);
                }
                Err(_) => trace!("[engine] {}", trimmed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};

    /// Channel whose engine emits `lines` right after the first request
    fn channel_with_lines(lines: &[&str]) -> (RpcChannel, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        reply_later(&tx, lines);
        let channel = RpcChannel::new(tokio::io::sink(), rx, Duration::from_secs(1));
        (channel, tx)
    }

    /// Send `lines` shortly after the next request has been written
    fn reply_later(tx: &mpsc::UnboundedSender<String>, lines: &[&str]) {
        let tx = tx.clone();
        let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            for line in lines {
                let _ = tx.send(line);
            }
        });
    }

    #[tokio::test]
    async fn test_skips_log_lines_until_json() {
        let (mut channel, tx) = channel_with_lines(&[
            "   Compiling kdapp-mcp-server v0.1.0",
            "🔑 Signing with pubkey: 02ab",
            "",
            r#"{"jsonrpc":"2.0","id":1,"result":{"txid":"abc"}}"#,
        ]);

        let response = channel.request("tools/list", json!({})).await.unwrap();
        assert_eq!(response.result, Some(json!({"txid": "abc"})));
        assert!(!response.is_error());

        // Lines without an id still count as the answer
        reply_later(&tx, &["[kdapp] ok", r#"{"jsonrpc":"2.0","result":"second"}"#]);
        let response = channel.request("tools/list", json!({})).await.unwrap();
        assert_eq!(response.result, Some(json!("second")));
    }

    #[tokio::test]
    async fn test_late_reply_to_abandoned_call_is_discarded() {
        let (mut channel, tx) = channel_with_lines(&[]);
        let err = tokio_test::assert_err!(
            channel
                .call("tools/call", json!({}), Duration::from_millis(50))
                .await
        );
        assert!(matches!(err, TttError::RpcTimeout(_, _)));

        // Queued before the next write: dropped
        tx.send(r#"{"jsonrpc":"2.0","result":"queued"}"#.to_string())
            .unwrap();
        // Arrives while the next call waits: skipped by id
        reply_later(
            &tx,
            &[
                r#"{"jsonrpc":"2.0","id":1,"result":"late"}"#,
                r#"{"jsonrpc":"2.0","id":2,"result":"fresh"}"#,
            ],
        );

        let response = tokio_test::assert_ok!(channel.request("tools/call", json!({})).await);
        assert_eq!(response.result, Some(json!("fresh")));
    }

    #[tokio::test]
    async fn test_times_out_when_only_noise_arrives() {
        let (mut channel, _tx) = channel_with_lines(&["building...", "still building..."]);
        let result = channel
            .call("tools/list", json!({}), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(TttError::RpcTimeout(_, _))));
    }

    #[tokio::test]
    async fn test_closed_output_is_reported() {
        let (mut channel, tx) = channel_with_lines(&["goodbye"]);
        drop(tx);
        let result = channel.request("tools/list", json!({})).await;
        assert!(matches!(result, Err(TttError::EngineClosed)));
    }

    #[tokio::test]
    async fn test_null_result_is_distinct_from_missing_result() {
        let (mut channel, _tx) = channel_with_lines(&[r#"{"jsonrpc":"2.0","id":1,"result":null}"#]);
        let with_null = channel.request("tools/call", json!({})).await.unwrap();
        assert_eq!(with_null.result, Some(Value::Null));

        let (mut channel, _tx) = channel_with_lines(&[r#"{"jsonrpc":"2.0","id":1}"#]);
        let without = channel.request("tools/call", json!({})).await.unwrap();
        assert_eq!(without.result, None);
        assert!(without.into_result().is_err());
    }

    #[tokio::test]
    async fn test_error_response_is_returned_not_raised() {
        let (mut channel, _tx) = channel_with_lines(&[
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"Tool execution error","data":"Invalid move parameters"}}"#,
        ]);

        let response = channel.request("tools/call", json!({})).await.unwrap();
        assert!(response.is_error());
        let obj = response.error_object().unwrap();
        assert_eq!(obj.code, -32000);
        assert_eq!(obj.message, "Tool execution error");
        assert!(
            response
                .error_message()
                .unwrap()
                .contains("Invalid move parameters")
        );
    }

    #[tokio::test]
    async fn test_request_framing() {
        let (client_side, engine_side) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channel = RpcChannel::new(client_side, rx, Duration::from_secs(1));

        reply_later(&tx, &[r#"{"jsonrpc":"2.0","id":1,"result":[]}"#]);
        channel
            .request("tools/call", json!({"name": "kdapp_get_agent_pubkeys"}))
            .await
            .unwrap();

        let mut reader = BufReader::new(engine_side);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.ends_with('\n'));

        let sent: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(sent["jsonrpc"], "2.0");
        assert_eq!(sent["id"], 1);
        assert_eq!(sent["method"], "tools/call");
        assert_eq!(sent["params"]["name"], "kdapp_get_agent_pubkeys");
    }
}
