//! Move and game outcomes

use crate::board::{Mark, Position, Verdict};
use serde::{Deserialize, Serialize};

/// Result of submitting one move to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Engine accepted the move; `tx_id` is the settlement proof when one was found
    Accepted {
        position: Position,
        tx_id: Option<String>,
    },
    /// Move failed local bounds/occupancy checks and was never sent
    RejectedInvalid,
    /// Enforcement is on and the response carried no transaction identifier
    RejectedNoOnchainProof,
    /// No JSON response before the call deadline
    RpcTimeout,
    /// Engine returned an error object or an unusable response
    RpcError(String),
}

impl MoveOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MoveOutcome::Accepted { .. })
    }
}

/// How a game ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameOutcome {
    Winner(Mark),
    Draw,
    /// Consecutive-failure ceiling reached
    Abandoned,
}

impl From<Verdict> for GameOutcome {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Winner(mark) => GameOutcome::Winner(mark),
            Verdict::Draw => GameOutcome::Draw,
        }
    }
}

/// One accepted move in a finished or running game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub mark: Mark,
    pub position: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    /// Placed by the deterministic fallback after a rejection
    pub via_fallback: bool,
}
