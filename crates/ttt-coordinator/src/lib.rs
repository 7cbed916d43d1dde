//! # ttt-coordinator
//!
//! Plays one tic-tac-toe episode through a kdapp engine.
//!
//! This crate provides:
//! - `CoordinatorConfig`: defaults plus `TTT_*` environment overrides
//! - `GameCoordinator`: the turn-taking state machine with fallback moves
//! - `SettlementPolicy`: on-chain proof enforcement for move responses
//! - `MoveSuggester`: remote LLM suggestion sources
//! - `FileKeyStore`: participant addresses when the engine has no wallets
//! - `run_game`: supervisor, channel and coordinator wired together

pub mod config;
pub mod coordinator;
pub mod keys;
pub mod picker;
pub mod policy;
pub mod suggest;

pub use config::{AgentEndpoint, CoordinatorConfig};
pub use coordinator::{
    CoordinatorOptions, GameCoordinator, GameReport, Phase, ProofRetry, TurnState,
};
pub use keys::{FileKeyStore, KeyStore};
pub use policy::SettlementPolicy;
pub use suggest::{ChatCompletionsSuggester, GenerateSuggester, MoveSuggester, PickerOnly};

use tracing::{info, warn};
use ttt_core::Result;
use ttt_engine::{EngineClient, EngineProcess};

/// Launch the engine, play one game, and always tear the engine down
pub async fn run_game(config: &CoordinatorConfig) -> Result<GameReport> {
    let mut process = EngineProcess::start(&config.engine, &config.supervisor).await?;
    let report = drive(&mut process, config).await;
    process.terminate().await;
    report
}

async fn drive(process: &mut EngineProcess, config: &CoordinatorConfig) -> Result<GameReport> {
    let mut client = EngineClient::new(process.take_channel(config.rpc_timeout)?);

    match client.list_tools().await {
        Ok(tools) => info!("Engine exposes {} tools: {}", tools.len(), tools.join(", ")),
        Err(e) => warn!("tools/list failed: {}", e),
    }

    let require_onchain = config.require_onchain.unwrap_or(!process.is_offline());
    let policy = SettlementPolicy {
        require_onchain,
        settlement_available: !process.is_offline(),
    };
    info!(
        "On-chain enforcement: {}",
        if require_onchain { "on" } else { "off" }
    );

    let (x, o) = suggesters(config)?;
    let options = CoordinatorOptions {
        max_consecutive_failures: config.max_consecutive_failures,
        ..CoordinatorOptions::new(policy)
    };
    let mut game = GameCoordinator::new(client, options, x, o);

    let keys = FileKeyStore::new(&config.keys_dir);
    let [agent1, agent2] = game.resolve_participants(&keys).await?;
    game.start([agent1.as_str(), agent2.as_str()]).await?;
    game.play().await
}

/// X asks the chat-completions agent, O the generate agent
fn suggesters(config: &CoordinatorConfig) -> Result<(Box<dyn MoveSuggester>, Box<dyn MoveSuggester>)> {
    if !config.use_agents {
        info!("Agents disabled; both sides use the default move picker");
        return Ok((Box::new(PickerOnly), Box::new(PickerOnly)));
    }

    let x = ChatCompletionsSuggester::new(
        &config.agent1.url,
        &config.agent1.model,
        config.suggestion_timeout,
    )?;
    let o = GenerateSuggester::new(
        &config.agent2.url,
        &config.agent2.model,
        config.suggestion_timeout,
    )?;
    info!(
        "Agents: X -> {} ({}), O -> {} ({})",
        config.agent1.url, config.agent1.model, config.agent2.url, config.agent2.model
    );
    Ok((Box::new(x), Box::new(o)))
}
