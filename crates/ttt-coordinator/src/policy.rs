//! On-chain settlement policy for move responses

use serde_json::Value;
use tracing::{info, warn};
use ttt_core::{MoveOutcome, Position, Result, TttError};
use ttt_engine::RpcResponse;

/// Result fields that may carry a transaction id, in search order
pub const TX_FIELDS: [&str; 5] = ["tx_hash", "txid", "tx", "transaction", "hash"];

/// Fields searched inside a nested `receipt` object
pub const RECEIPT_FIELDS: [&str; 3] = ["tx_hash", "txid", "hash"];

/// Shortest bare-string result accepted as a transaction id
pub const MIN_BARE_TX_LEN: usize = 8;

/// Null, `false`, zero, or an empty string, array or object
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}

fn as_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Find a transaction id in a move result
///
/// Direct fields first, skipping blank values, then one level of `receipt`,
/// then a bare string. Inside `receipt` the first present field decides:
/// a blank value there means no id.
pub fn extract_tx_id(result: &Value) -> Option<String> {
    match result {
        Value::Object(_) => TX_FIELDS
            .iter()
            .filter_map(|key| result.get(key))
            .find(|v| !is_blank(v))
            .or_else(|| {
                let receipt = result.get("receipt").filter(|r| r.is_object())?;
                RECEIPT_FIELDS.iter().find_map(|key| receipt.get(key))
            })
            .filter(|v| !is_blank(v))
            .map(as_id),
        Value::String(s) if s.len() >= MIN_BARE_TX_LEN => Some(s.clone()),
        _ => None,
    }
}

/// Settlement requirements for one game
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementPolicy {
    /// Every accepted move must carry a transaction id
    pub require_onchain: bool,
    /// The engine can sign and submit transactions
    pub settlement_available: bool,
}

impl SettlementPolicy {
    /// Episode-only play; null results are fine
    pub fn offline() -> Self {
        Self {
            require_onchain: false,
            settlement_available: false,
        }
    }

    pub fn onchain() -> Self {
        Self {
            require_onchain: true,
            settlement_available: true,
        }
    }

    /// Gate for starting an episode
    pub fn ensure_startable(&self) -> Result<()> {
        if self.require_onchain && !self.settlement_available {
            return Err(TttError::OnchainUnavailable);
        }
        Ok(())
    }

    /// Classify the engine's answer to a submitted move
    pub fn classify(&self, position: Position, response: Result<RpcResponse>) -> MoveOutcome {
        let response = match response {
            Ok(response) => response,
            Err(TttError::RpcTimeout(after, _)) => {
                warn!("Move {} timed out after {:?}", position, after);
                return MoveOutcome::RpcTimeout;
            }
            Err(e) => {
                warn!("Move {} failed: {}", position, e);
                return MoveOutcome::RpcError(e.to_string());
            }
        };

        if let Some(message) = response.error_message() {
            warn!("Engine rejected move {}: {}", position, message);
            return MoveOutcome::RpcError(message);
        }

        let Some(result) = response.result else {
            warn!("Engine answered move {} with neither result nor error", position);
            return MoveOutcome::RpcError("response carried neither result nor error".into());
        };

        if is_blank(&result) {
            warn!(
                "Move {} returned an empty result; no on-chain transaction was produced",
                position
            );
            if self.require_onchain {
                warn!("On-chain enforcement is enabled; rejecting move {}", position);
                return MoveOutcome::RejectedNoOnchainProof;
            }
            return MoveOutcome::Accepted {
                position,
                tx_id: None,
            };
        }

        let tx_id = extract_tx_id(&result);
        match (&tx_id, self.require_onchain) {
            (Some(tx), _) => info!("Move {} produced on-chain tx: {}", position, tx),
            (None, true) => {
                warn!(
                    "On-chain enforcement is enabled but no tx id was found for move {}; rejecting",
                    position
                );
                return MoveOutcome::RejectedNoOnchainProof;
            }
            (None, false) => {}
        }

        MoveOutcome::Accepted { position, tx_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn pos() -> Position {
        Position::new(1, 1).unwrap()
    }

    fn response(value: Value) -> Result<RpcResponse> {
        Ok(RpcResponse::from_value(value))
    }

    #[test]
    fn test_extract_direct_fields_in_order() {
        assert_eq!(
            extract_tx_id(&json!({"txid": "abc", "explorer_url": "https://x"})),
            Some("abc".into())
        );
        assert_eq!(
            extract_tx_id(&json!({"hash": "h", "tx_hash": "t"})),
            Some("t".into())
        );
        assert_eq!(
            extract_tx_id(&json!({"tx_hash": "", "transaction": "tr"})),
            Some("tr".into())
        );
    }

    #[test]
    fn test_extract_nested_receipt_and_bare_string() {
        assert_eq!(
            extract_tx_id(&json!({"status": "ok", "receipt": {"hash": "r1"}})),
            Some("r1".into())
        );
        // direct fields win over the receipt
        assert_eq!(
            extract_tx_id(&json!({"tx": "d", "receipt": {"txid": "r"}})),
            Some("d".into())
        );
        assert_eq!(
            extract_tx_id(&json!({"receipt": {"block": 1}})),
            None
        );
        assert_eq!(
            extract_tx_id(&json!("f3a9c1d2e4b5")),
            Some("f3a9c1d2e4b5".into())
        );
        assert_eq!(extract_tx_id(&json!("short")), None);
        assert_eq!(extract_tx_id(&json!(42)), None);
    }

    #[test]
    fn test_blank_values_never_count_as_tx_ids() {
        // zero is skipped like any other blank direct field
        assert_eq!(
            extract_tx_id(&json!({"tx": 0, "hash": "h1"})),
            Some("h1".into())
        );
        assert_eq!(extract_tx_id(&json!({"tx": 0})), None);
        // the first receipt field present decides, even when blank
        assert_eq!(
            extract_tx_id(&json!({"receipt": {"tx_hash": "", "hash": "abc"}})),
            None
        );
        assert_eq!(
            extract_tx_id(&json!({"receipt": {"txid": null, "hash": "abc"}})),
            None
        );

        let outcome = SettlementPolicy::onchain().classify(
            pos(),
            response(json!({"result": {"receipt": {"tx_hash": "", "hash": "abc"}}})),
        );
        assert_eq!(outcome, MoveOutcome::RejectedNoOnchainProof);
    }

    #[test]
    fn test_enforced_result_without_tx_is_rejected() {
        let policy = SettlementPolicy::onchain();
        let outcome = policy.classify(pos(), response(json!({"jsonrpc": "2.0", "result": {"status": "applied"}})));
        assert_eq!(outcome, MoveOutcome::RejectedNoOnchainProof);

        let outcome = policy.classify(pos(), response(json!({"result": null})));
        assert_eq!(outcome, MoveOutcome::RejectedNoOnchainProof);
    }

    #[test]
    fn test_enforced_result_with_tx_is_accepted() {
        let policy = SettlementPolicy::onchain();
        let outcome = policy.classify(
            pos(),
            response(json!({"result": {"receipt": {"tx_hash": "0xfeed"}}})),
        );
        assert_eq!(
            outcome,
            MoveOutcome::Accepted {
                position: pos(),
                tx_id: Some("0xfeed".into())
            }
        );
    }

    #[test]
    fn test_unenforced_null_result_is_accepted() {
        let policy = SettlementPolicy::offline();
        let outcome = policy.classify(pos(), response(json!({"result": null})));
        assert_eq!(
            outcome,
            MoveOutcome::Accepted {
                position: pos(),
                tx_id: None
            }
        );
    }

    #[test]
    fn test_errors_and_timeouts_are_rejections() {
        let policy = SettlementPolicy::offline();

        let outcome = policy.classify(
            pos(),
            response(json!({"error": {"code": -32000, "message": "Tool execution error"}})),
        );
        assert!(matches!(outcome, MoveOutcome::RpcError(_)));

        let outcome = policy.classify(pos(), response(json!({"jsonrpc": "2.0", "id": 1})));
        assert!(matches!(outcome, MoveOutcome::RpcError(_)));

        let outcome = policy.classify(
            pos(),
            Err(TttError::RpcTimeout(Duration::from_secs(5), "tools/call".into())),
        );
        assert_eq!(outcome, MoveOutcome::RpcTimeout);

        let outcome = policy.classify(pos(), Err(TttError::EngineClosed));
        assert!(matches!(outcome, MoveOutcome::RpcError(_)));
    }

    #[test]
    fn test_start_gate() {
        assert!(SettlementPolicy::onchain().ensure_startable().is_ok());
        assert!(SettlementPolicy::offline().ensure_startable().is_ok());
        let missing = SettlementPolicy {
            require_onchain: true,
            settlement_available: false,
        };
        assert!(matches!(
            missing.ensure_startable(),
            Err(TttError::OnchainUnavailable)
        ));
    }
}
