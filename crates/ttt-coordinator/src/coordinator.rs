//! Turn-taking state machine
//!
//! ```text
//! AwaitingStart --start--> InProgress --ply*--> Terminal(winner | draw | abandoned)
//! ```
//!
//! Each ply asks the side's suggestion source for a move, falls back to the
//! deterministic picker when the suggestion is unusable, submits the move,
//! and classifies the engine's answer with the settlement policy. A rejected
//! move gets exactly one fallback resubmission. Consecutive failed plies are
//! counted and end the game once the ceiling is reached.

use crate::keys::KeyStore;
use crate::picker;
use crate::policy::SettlementPolicy;
use crate::suggest::MoveSuggester;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use ttt_core::{
    Board, GameOutcome, Mark, MoveOutcome, MoveRecord, Position, Result, TttError,
};
use ttt_engine::{EngineClient, EpisodeHandle};

/// Hard ply ceiling: one move per cell
pub const MAX_PLIES: u32 = 9;

/// Default consecutive-failure ceiling
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingStart,
    InProgress,
    /// Absorbing; no further engine calls are made
    Terminal(GameOutcome),
}

/// Whose turn it is and how the game is going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnState {
    pub to_move: Mark,
    /// Accepted moves so far
    pub moves: u32,
    /// Failed plies since the last accepted move
    pub consecutive_failures: u32,
}

impl Default for TurnState {
    fn default() -> Self {
        Self {
            to_move: Mark::X,
            moves: 0,
            consecutive_failures: 0,
        }
    }
}

/// Which cell the fallback retries after a missing settlement proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProofRetry {
    /// Treat it like any rejection and pick a different cell
    #[default]
    DifferentCell,
    /// Resubmit the same, legal cell
    SameCell,
}

/// Game-level options
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorOptions {
    pub policy: SettlementPolicy,
    pub max_consecutive_failures: u32,
    pub proof_retry: ProofRetry,
}

impl CoordinatorOptions {
    pub fn new(policy: SettlementPolicy) -> Self {
        Self {
            policy,
            max_consecutive_failures: DEFAULT_MAX_FAILURES,
            proof_retry: ProofRetry::default(),
        }
    }
}

/// Summary of a finished game
#[derive(Debug, Clone, Serialize)]
pub struct GameReport {
    pub episode_id: EpisodeHandle,
    pub outcome: GameOutcome,
    pub board: Board,
    pub moves: Vec<MoveRecord>,
    pub onchain_enforced: bool,
}

struct Side {
    signer: &'static str,
    suggester: Box<dyn MoveSuggester>,
}

/// Drives one episode from start to a terminal outcome
pub struct GameCoordinator {
    client: EngineClient,
    options: CoordinatorOptions,
    board: Board,
    turn: TurnState,
    phase: Phase,
    episode: Option<EpisodeHandle>,
    x: Side,
    o: Side,
    moves: Vec<MoveRecord>,
}

impl GameCoordinator {
    /// X is signed by `agent1`, O by `agent2`
    pub fn new(
        client: EngineClient,
        options: CoordinatorOptions,
        x_suggester: Box<dyn MoveSuggester>,
        o_suggester: Box<dyn MoveSuggester>,
    ) -> Self {
        Self {
            client,
            options,
            board: Board::new(),
            turn: TurnState::default(),
            phase: Phase::AwaitingStart,
            episode: None,
            x: Side {
                signer: "agent1",
                suggester: x_suggester,
            },
            o: Side {
                signer: "agent2",
                suggester: o_suggester,
            },
            moves: Vec::new(),
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn turn(&self) -> TurnState {
        self.turn
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn episode(&self) -> Option<&EpisodeHandle> {
        self.episode.as_ref()
    }

    pub fn moves(&self) -> &[MoveRecord] {
        &self.moves
    }

    /// Episode participants: the engine's wallet pubkeys when it reports both,
    /// otherwise the key store's addresses
    pub async fn resolve_participants(&mut self, keys: &dyn KeyStore) -> Result<[String; 2]> {
        match self.client.agent_pubkeys().await {
            Ok(pubkeys) => {
                if let (Some(a), Some(b)) = (pubkeys.agent1, pubkeys.agent2) {
                    info!("Engine wallet pubkeys: agent1={}, agent2={}", a, b);
                    return Ok([a, b]);
                }
                warn!("Engine reported incomplete wallet pubkeys; using key store");
            }
            Err(e) => warn!("Could not fetch engine wallet pubkeys: {}", e),
        }

        let a = keys.address_for("agent1")?;
        let b = keys.address_for("agent2")?;
        info!("Key store addresses: agent1={}, agent2={}", a, b);
        Ok([a, b])
    }

    /// AwaitingStart -> InProgress
    pub async fn start(&mut self, participants: [&str; 2]) -> Result<()> {
        if self.phase != Phase::AwaitingStart {
            return Err(TttError::Protocol(format!(
                "cannot start an episode in phase {:?}",
                self.phase
            )));
        }
        self.options.policy.ensure_startable()?;

        info!(
            "Starting episode with participants: {}, {}",
            participants[0], participants[1]
        );
        let episode = self.client.start_episode(participants).await?;

        match self.client.episode_state(&episode).await {
            Ok(state) => match participants_in(&state) {
                Some(onchain) => info!("Episode participants (engine): {}", onchain),
                None => debug!("kdapp_get_episode_state returned: {}", state),
            },
            Err(e) => warn!("Could not read episode state: {}", e),
        }

        self.episode = Some(episode);
        self.phase = Phase::InProgress;
        Ok(())
    }

    /// Run plies until a terminal phase
    pub async fn play(&mut self) -> Result<GameReport> {
        if self.phase == Phase::AwaitingStart {
            return Err(TttError::Protocol("episode has not been started".into()));
        }

        let outcome = loop {
            match self.phase {
                Phase::Terminal(outcome) => break outcome,
                _ => self.play_ply().await,
            };
        };
        match outcome {
            GameOutcome::Winner(mark) => info!("Player {} wins!", mark),
            GameOutcome::Draw => info!("Game ended in a draw!"),
            GameOutcome::Abandoned => warn!(
                "Game abandoned after {} consecutive failed plies",
                self.turn.consecutive_failures
            ),
        }
        info!("Final board:\n{}", self.board);

        Ok(GameReport {
            episode_id: self
                .episode
                .clone()
                .ok_or_else(|| TttError::Protocol("no episode handle".into()))?,
            outcome,
            board: self.board,
            moves: self.moves.clone(),
            onchain_enforced: self.options.policy.require_onchain,
        })
    }

    /// Terminal checks, then at most one move plus one fallback
    pub async fn play_ply(&mut self) -> Phase {
        if self.phase != Phase::InProgress || self.enter_terminal_if_done() {
            return self.phase;
        }

        let mark = self.turn.to_move;
        info!("Player {}'s turn\n{}", mark, self.board);

        let Some(candidate) = self.candidate(mark).await else {
            self.enter_terminal_if_done();
            return self.phase;
        };

        let outcome = self.submit(candidate).await;
        if let MoveOutcome::Accepted { position, tx_id } = outcome {
            self.accept(mark, position, tx_id, false);
        } else {
            self.turn.consecutive_failures += 1;
            warn!(
                "Move {} for {} rejected ({:?}); failures: {}",
                candidate, mark, outcome, self.turn.consecutive_failures
            );

            let retry = match (outcome, self.options.proof_retry) {
                (MoveOutcome::RejectedNoOnchainProof, ProofRetry::SameCell) => Some(candidate),
                _ => picker::fallback_move(&self.board, Some(candidate)),
            };

            if let Some(fallback) = retry {
                info!("Trying fallback move {} for {}", fallback, mark);
                match self.submit(fallback).await {
                    MoveOutcome::Accepted { position, tx_id } => {
                        self.accept(mark, position, tx_id, true)
                    }
                    rejected => warn!(
                        "Fallback move {} for {} also rejected ({:?}); ply abandoned",
                        fallback, mark, rejected
                    ),
                }
            }
        }

        self.enter_terminal_if_done();
        self.phase
    }

    /// Submit one move after local validation
    pub async fn submit(&mut self, position: Position) -> MoveOutcome {
        if !self.board.get(position).is_empty() {
            warn!("Move {} is occupied; not sending it", position);
            return MoveOutcome::RejectedInvalid;
        }
        let Some(episode) = self.episode.as_ref() else {
            return MoveOutcome::RpcError("no episode".into());
        };

        let mark = self.turn.to_move;
        let signer = self.side(mark).signer;
        let response = self
            .client
            .execute_move(episode, mark, position, signer)
            .await;
        self.options.policy.classify(position, response)
    }

    /// Side's suggestion if it passes local validation, else the picker's move
    async fn candidate(&self, mark: Mark) -> Option<Position> {
        let side = self.side(mark);
        match side.suggester.suggest(mark, &self.board).await {
            Ok((row, col)) if self.board.is_valid_move(row, col) => {
                let position = Position::new(row, col).ok()?;
                info!("{} suggested {} for {}", side.suggester.name(), position, mark);
                return Some(position);
            }
            Ok((row, col)) => warn!(
                "{} suggested invalid move ({}, {}) for {}; using default move",
                side.suggester.name(),
                row,
                col,
                mark
            ),
            Err(e) => debug!("No suggestion for {}: {}", mark, e),
        }
        picker::default_move(&self.board)
    }

    fn accept(&mut self, mark: Mark, position: Position, tx_id: Option<String>, via_fallback: bool) {
        if let Err(e) = self.board.place(position, mark) {
            // The engine accepted a move the local board cannot hold
            warn!("Accepted move {} could not be applied: {}", position, e);
            self.turn.consecutive_failures += 1;
            return;
        }
        info!(
            "Player {} moves to {}{}",
            mark,
            position,
            if via_fallback { " using default move" } else { "" }
        );
        self.moves.push(MoveRecord {
            mark,
            position,
            tx_id,
            via_fallback,
        });
        self.turn.to_move = mark.opponent();
        self.turn.moves += 1;
        self.turn.consecutive_failures = 0;
    }

    /// Move to `Terminal` on a win, draw, ply ceiling or failure ceiling
    fn enter_terminal_if_done(&mut self) -> bool {
        if let Phase::Terminal(_) = self.phase {
            return true;
        }

        let outcome = match self.board.check_winner() {
            Some(verdict) => Some(GameOutcome::from(verdict)),
            None if self.turn.consecutive_failures >= self.options.max_consecutive_failures => {
                Some(GameOutcome::Abandoned)
            }
            None if self.turn.moves >= MAX_PLIES || self.board.is_full() => Some(GameOutcome::Draw),
            None => None,
        };

        match outcome {
            Some(outcome) => {
                self.phase = Phase::Terminal(outcome);
                true
            }
            None => false,
        }
    }

    fn side(&self, mark: Mark) -> &Side {
        match mark {
            Mark::X => &self.x,
            Mark::O => &self.o,
        }
    }
}

fn participants_in(state: &Value) -> Option<&Value> {
    state
        .get("participants")
        .or_else(|| state.get("metadata").and_then(|m| m.get("participants")))
        .filter(|p| !p.is_null())
}
