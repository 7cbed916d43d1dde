//! Tic-tac-toe episode coordinator
//!
//! Starts the kdapp engine, plays one game between two agents, and prints
//! the result. Configuration comes from `TTT_*` environment variables.
//!
//! Flags:
//! - `--offline`: never require on-chain transaction ids
//! - `--no-agents`: both sides use the deterministic move picker

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use ttt_coordinator::{CoordinatorConfig, run_game};
use ttt_core::GameOutcome;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command line arguments
    let mut config = CoordinatorConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--offline" => config.require_onchain = Some(false),
            "--no-agents" => config.use_agents = false,
            other => anyhow::bail!("Unknown argument: {} (expected --offline or --no-agents)", other),
        }
    }

    info!("Tic-tac-toe coordinator starting");
    info!("Engine: {} {}", config.engine.program, config.engine.args.join(" "));

    let report = match run_game(&config).await {
        Ok(report) => report,
        Err(e) => {
            error!("Game failed: {}", e);
            return Err(anyhow::anyhow!("Game failed: {}", e));
        }
    };

    for (i, record) in report.moves.iter().enumerate() {
        info!(
            "Move {}: {} at {}{}{}",
            i + 1,
            record.mark,
            record.position,
            record.tx_id.as_deref().map(|tx| format!(" (tx {})", tx)).unwrap_or_default(),
            if record.via_fallback { " [fallback]" } else { "" }
        );
    }
    info!("Episode {} final board:\n{}", report.episode_id, report.board);

    match report.outcome {
        GameOutcome::Winner(mark) => println!("Player {} wins", mark),
        GameOutcome::Draw => println!("Draw"),
        GameOutcome::Abandoned => println!("Abandoned after repeated move failures"),
    }

    info!("Coordinator shutting down");
    Ok(())
}
