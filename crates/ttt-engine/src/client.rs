//! Typed calls for the kdapp tools exposed by the engine

use crate::channel::{RpcChannel, RpcResponse};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};
use ttt_core::{Mark, Position, Result, TttError};

/// Opaque episode identifier returned by `kdapp_start_episode`
///
/// Kept in string form; the engine expects `episode_id` as a string even
/// when it reports the id as a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeHandle(String);

impl EpisodeHandle {
    /// Read a handle from a start-episode result
    pub fn from_result(result: &Value) -> Result<Self> {
        match result {
            Value::String(s) if !s.is_empty() => Ok(Self(s.clone())),
            Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(TttError::Protocol(format!(
                "Unexpected episode handle: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EpisodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-side public identifiers held by the engine's wallets
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentPubkeys {
    #[serde(rename = "agent1_pubkey")]
    pub agent1: Option<String>,
    #[serde(rename = "agent2_pubkey")]
    pub agent2: Option<String>,
}

/// kdapp tool client on top of an [`RpcChannel`]
pub struct EngineClient {
    channel: RpcChannel,
}

impl EngineClient {
    pub fn new(channel: RpcChannel) -> Self {
        Self { channel }
    }

    /// Raw channel access for methods without a typed wrapper
    pub fn channel(&mut self) -> &mut RpcChannel {
        &mut self.channel
    }

    /// Discover the engine's tools and return their names
    pub async fn list_tools(&mut self) -> Result<Vec<String>> {
        let result = self
            .channel
            .request("tools/list", json!({}))
            .await?
            .into_result()?;

        // kdapp answers with a bare array, MCP servers with {"tools": [...]}
        let tools = match &result {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) => map
                .get("tools")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            _ => &[],
        };

        let names: Vec<String> = tools
            .iter()
            .filter_map(|t| t.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        debug!("Engine tools: {:?}", names);
        Ok(names)
    }

    /// Call a tool with the default timeout and return the raw response
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<RpcResponse> {
        let timeout = self.channel.default_timeout();
        self.call_tool_with_timeout(name, arguments, timeout).await
    }

    pub async fn call_tool_with_timeout(
        &mut self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<RpcResponse> {
        self.channel
            .call(
                "tools/call",
                json!({ "name": name, "arguments": arguments }),
                timeout,
            )
            .await
    }

    /// Public identifiers of the engine's two signing wallets
    pub async fn agent_pubkeys(&mut self) -> Result<AgentPubkeys> {
        let result = self
            .call_tool("kdapp_get_agent_pubkeys", json!({}))
            .await?
            .into_result()?;
        serde_json::from_value(result).map_err(Into::into)
    }

    /// Start an episode for two participants
    pub async fn start_episode(&mut self, participants: [&str; 2]) -> Result<EpisodeHandle> {
        let result = self
            .call_tool(
                "kdapp_start_episode",
                json!({ "participants": participants }),
            )
            .await?
            .into_result()?;
        let handle = EpisodeHandle::from_result(&result)?;
        info!("Episode started: {}", handle);
        Ok(handle)
    }

    /// Submit a move; the caller interprets the response
    pub async fn execute_move(
        &mut self,
        episode: &EpisodeHandle,
        mark: Mark,
        position: Position,
        signer: &str,
    ) -> Result<RpcResponse> {
        self.call_tool(
            "kdapp_execute_command",
            json!({
                "episode_id": episode.as_str(),
                "command": {
                    "type": "move",
                    "player": mark.as_str(),
                    "row": position.row(),
                    "col": position.col()
                },
                "signer": signer
            }),
        )
        .await
    }

    /// Current episode metadata
    pub async fn episode_state(&mut self, episode: &EpisodeHandle) -> Result<Value> {
        self.call_tool(
            "kdapp_get_episode_state",
            json!({ "episode_id": episode.as_str() }),
        )
        .await?
        .into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::mpsc;

    /// Engine stand-in: answers each request line with the next scripted reply
    fn scripted(replies: Vec<&'static str>) -> (EngineClient, tokio::task::JoinHandle<Vec<Value>>) {
        let (client_side, engine_side) = tokio::io::duplex(16 * 1024);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut lines = BufReader::new(engine_side).lines();
            for reply in replies {
                let Ok(Some(line)) = lines.next_line().await else {
                    break;
                };
                seen.push(serde_json::from_str(&line).unwrap());
                let _ = tx.send("[engine] handling request".to_string());
                let _ = tx.send(reply.to_string());
            }
            seen
        });
        let channel = RpcChannel::new(client_side, rx, Duration::from_secs(2));
        (EngineClient::new(channel), handle)
    }

    #[tokio::test]
    async fn test_start_episode_and_move() {
        let (mut client, engine) = scripted(vec![
            r#"{"jsonrpc":"2.0","id":1,"result":[{"name":"kdapp_start_episode"},{"name":"kdapp_execute_command"}]}"#,
            r#"{"jsonrpc":"2.0","id":2,"result":{"agent1_pubkey":"02aa","agent2_pubkey":"03bb"}}"#,
            r#"{"jsonrpc":"2.0","id":3,"result":4242}"#,
            r#"{"jsonrpc":"2.0","id":4,"result":null}"#,
        ]);

        let tools = tokio_test::assert_ok!(client.list_tools().await);
        assert_eq!(tools, vec!["kdapp_start_episode", "kdapp_execute_command"]);

        let keys = client.agent_pubkeys().await.unwrap();
        assert_eq!(keys.agent1.as_deref(), Some("02aa"));
        assert_eq!(keys.agent2.as_deref(), Some("03bb"));

        let episode = client.start_episode(["02aa", "03bb"]).await.unwrap();
        assert_eq!(episode.as_str(), "4242");

        let response = client
            .execute_move(&episode, Mark::O, Position::new(2, 1).unwrap(), "agent2")
            .await
            .unwrap();
        assert_eq!(response.result, Some(Value::Null));

        let seen = engine.await.unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[2]["params"]["arguments"]["participants"][1], "03bb");
        let args = &seen[3]["params"]["arguments"];
        assert_eq!(seen[3]["params"]["name"], "kdapp_execute_command");
        assert_eq!(args["episode_id"], "4242");
        assert_eq!(args["command"]["type"], "move");
        assert_eq!(args["command"]["player"], "O");
        assert_eq!(args["command"]["row"], 2);
        assert_eq!(args["command"]["col"], 1);
        assert_eq!(args["signer"], "agent2");
    }

    #[tokio::test]
    async fn test_start_episode_error_is_protocol_error() {
        let (mut client, _engine) = scripted(vec![
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"Tool execution error"}}"#,
        ]);
        let err = tokio_test::assert_err!(client.start_episode(["a", "b"]).await);
        assert!(matches!(err, TttError::Protocol(_)));
    }

    #[test]
    fn test_episode_handle_shapes() {
        assert_eq!(
            EpisodeHandle::from_result(&json!("ep-1")).unwrap().as_str(),
            "ep-1"
        );
        assert_eq!(EpisodeHandle::from_result(&json!(7)).unwrap().as_str(), "7");
        assert!(EpisodeHandle::from_result(&json!(null)).is_err());
        assert!(EpisodeHandle::from_result(&json!("")).is_err());
    }
}
