//! Remote move suggestion sources
//!
//! Suggestions are advisory. Each source asks an LLM-style HTTP endpoint
//! for a move and mines the free-text answer for `{"row": r, "col": c}`.
//! Any failure is returned as an error and the coordinator falls back to
//! the deterministic picker.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use ttt_core::{Board, Mark, Result, TttError};

/// Source of candidate moves for one side
#[async_trait]
pub trait MoveSuggester: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Propose raw `(row, col)` coordinates; the caller validates them
    async fn suggest(&self, mark: Mark, board: &Board) -> Result<(i64, i64)>;
}

/// Prompt sent to both endpoint styles
pub fn prompt_for(mark: Mark, board: &Board) -> String {
    let opponent = mark.opponent();
    format!(
        "You are playing TicTacToe as '{mark}'. Analyze the current board state and make a strategic move.\n\
         \n\
         Current board state:\n\
         {board}\n\
         Analyze the board carefully:\n\
         1. Look for any possible winning moves for you ({mark})\n\
         2. Look for any moves your opponent ({opponent}) needs to be blocked\n\
         3. Consider strategic positions (center, corners)\n\
         \n\
         Provide your move as a JSON object with \"row\" and \"col\" fields (0-2).\n\
         Example: {{\"row\": 1, \"col\": 1}}\n"
    )
}

fn coordinate(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// First JSON object in `text` that carries both `row` and `col`
pub fn extract_move(text: &str) -> Option<(i64, i64)> {
    text.match_indices('{').find_map(|(start, _)| {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        let value = stream.next()?.ok()?;
        let row = coordinate(value.get("row")?)?;
        let col = coordinate(value.get("col")?)?;
        Some((row, col))
    })
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TttError::Suggestion(format!("HTTP client setup failed: {}", e)))
}

async fn post_json(client: &reqwest::Client, url: &str, body: &Value) -> Result<Value> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| TttError::Suggestion(format!("{}: {}", url, e)))?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(TttError::Suggestion(format!("{} returned {}", url, status)));
    }

    response
        .json()
        .await
        .map_err(|e| TttError::Suggestion(format!("{}: invalid JSON body: {}", url, e)))
}

fn mine(source: &str, content: &str) -> Result<(i64, i64)> {
    debug!("[{}] suggestion text: {}", source, content);
    extract_move(content)
        .ok_or_else(|| TttError::Suggestion(format!("{}: no move found in reply", source)))
}

/// OpenAI-compatible `/v1/chat/completions` endpoint (LM Studio)
pub struct ChatCompletionsSuggester {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
}

impl ChatCompletionsSuggester {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.7,
        })
    }
}

#[async_trait]
impl MoveSuggester for ChatCompletionsSuggester {
    fn name(&self) -> &str {
        "chat-completions"
    }

    async fn suggest(&self, mark: Mark, board: &Board) -> Result<(i64, i64)> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt_for(mark, board) }],
            "temperature": self.temperature
        });

        let reply = post_json(&self.client, &url, &body).await?;
        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| TttError::Suggestion(format!("{}: missing message content", url)))?;
        mine(self.name(), content)
    }
}

/// Ollama-style `/api/generate` endpoint
pub struct GenerateSuggester {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl GenerateSuggester {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl MoveSuggester for GenerateSuggester {
    fn name(&self) -> &str {
        "generate"
    }

    async fn suggest(&self, mark: Mark, board: &Board) -> Result<(i64, i64)> {
        let url = format!("{}/api/generate", self.base_url);
        let body = json!({
            "model": self.model,
            "prompt": prompt_for(mark, board),
            "stream": false
        });

        let reply = post_json(&self.client, &url, &body).await?;
        let content = reply["response"]
            .as_str()
            .ok_or_else(|| TttError::Suggestion(format!("{}: missing response field", url)))?;
        mine(self.name(), content)
    }
}

/// No remote source; every turn uses the deterministic picker
pub struct PickerOnly;

#[async_trait]
impl MoveSuggester for PickerOnly {
    fn name(&self) -> &str {
        "picker"
    }

    async fn suggest(&self, _mark: Mark, _board: &Board) -> Result<(i64, i64)> {
        Err(TttError::Suggestion("no suggestion source configured".into()))
    }
}
