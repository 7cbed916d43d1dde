//! Deterministic move picker used when no usable suggestion exists

use ttt_core::{Board, Position};

static CENTER: [(i64, i64); 1] = [(1, 1)];
static CORNERS: [(i64, i64); 4] = [(0, 0), (0, 2), (2, 0), (2, 2)];
static EDGES: [(i64, i64); 4] = [(0, 1), (1, 0), (1, 2), (2, 1)];

/// Empty cells in picker priority: center, corners, edges
fn by_priority(board: &Board) -> impl Iterator<Item = Position> + '_ {
    CENTER
        .iter()
        .chain(CORNERS.iter())
        .chain(EDGES.iter())
        .filter_map(|&(row, col)| Position::new(row, col).ok())
        .filter(|pos| board.get(*pos).is_empty())
        .chain(board.empty_cells())
}

/// Center, else the first free corner, else the first free edge
pub fn default_move(board: &Board) -> Option<Position> {
    by_priority(board).next()
}

/// Like [`default_move`] but avoids `rejected` whenever another empty cell exists
pub fn fallback_move(board: &Board, rejected: Option<Position>) -> Option<Position> {
    by_priority(board)
        .find(|pos| Some(*pos) != rejected)
        .or_else(|| default_move(board))
}
