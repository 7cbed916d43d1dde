//! Board state and winner evaluation

use crate::error::{Result, TttError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side length of the board
pub const SIZE: usize = 3;

/// A side in the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    /// Get the opposing side
    pub fn opponent(self) -> Mark {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }

    /// Wire name used in engine commands
    pub fn as_str(self) -> &'static str {
        match self {
            Mark::X => "X",
            Mark::O => "O",
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cell on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cell {
    #[default]
    Empty,
    Taken(Mark),
}

impl Cell {
    pub fn is_empty(self) -> bool {
        matches!(self, Cell::Empty)
    }

    pub fn mark(self) -> Option<Mark> {
        match self {
            Cell::Empty => None,
            Cell::Taken(mark) => Some(mark),
        }
    }
}

/// An in-bounds board coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPosition")]
pub struct Position {
    row: u8,
    col: u8,
}

/// Unchecked wire form of a [`Position`]
#[derive(Deserialize)]
struct RawPosition {
    row: i64,
    col: i64,
}

impl TryFrom<RawPosition> for Position {
    type Error = TttError;

    fn try_from(raw: RawPosition) -> Result<Self> {
        Position::new(raw.row, raw.col)
    }
}

impl Position {
    /// Build a position, rejecting anything outside `[0, 2]`
    pub fn new(row: i64, col: i64) -> Result<Self> {
        let in_range = |v: i64| (0..SIZE as i64).contains(&v);
        if in_range(row) && in_range(col) {
            Ok(Self {
                row: row as u8,
                col: col as u8,
            })
        } else {
            Err(TttError::InvalidMove(format!(
                "({}, {}) is off the board",
                row, col
            )))
        }
    }

    pub fn row(self) -> u8 {
        self.row
    }

    pub fn col(self) -> u8 {
        self.col
    }

    /// All nine positions in row-major order
    pub fn all() -> impl Iterator<Item = Position> {
        (0..SIZE as u8).flat_map(|row| (0..SIZE as u8).map(move |col| Position { row, col }))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Terminal evaluation of a board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Winner(Mark),
    Draw,
}

const LINES: [[(usize, usize); 3]; 8] = [
    [(0, 0), (0, 1), (0, 2)],
    [(1, 0), (1, 1), (1, 2)],
    [(2, 0), (2, 1), (2, 2)],
    [(0, 0), (1, 0), (2, 0)],
    [(0, 1), (1, 1), (2, 1)],
    [(0, 2), (1, 2), (2, 2)],
    [(0, 0), (1, 1), (2, 2)],
    [(0, 2), (1, 1), (2, 0)],
];

/// 3x3 tic-tac-toe board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Board {
    cells: [[Cell; SIZE]; SIZE],
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a board from rows of optional marks
    pub fn from_rows(rows: [[Option<Mark>; SIZE]; SIZE]) -> Self {
        let mut cells = [[Cell::Empty; SIZE]; SIZE];
        for (r, row) in rows.iter().enumerate() {
            for (c, mark) in row.iter().enumerate() {
                if let Some(mark) = mark {
                    cells[r][c] = Cell::Taken(*mark);
                }
            }
        }
        Self { cells }
    }

    pub fn get(&self, pos: Position) -> Cell {
        self.cells[pos.row as usize][pos.col as usize]
    }

    /// Local validation of a raw candidate: both coordinates in `[0, 2]` and the cell empty
    pub fn is_valid_move(&self, row: i64, col: i64) -> bool {
        Position::new(row, col).is_ok_and(|pos| self.get(pos).is_empty())
    }

    /// Empty cells in row-major order
    pub fn empty_cells(&self) -> impl Iterator<Item = Position> + '_ {
        Position::all().filter(|pos| self.get(*pos).is_empty())
    }

    pub fn is_full(&self) -> bool {
        self.empty_cells().next().is_none()
    }

    /// Number of occupied cells
    pub fn filled(&self) -> usize {
        Position::all().filter(|pos| !self.get(*pos).is_empty()).count()
    }

    /// Winner of any aligned triple, else `Draw` on a full board, else `None`
    pub fn check_winner(&self) -> Option<Verdict> {
        for line in LINES {
            let [a, b, c] = line.map(|(r, col)| self.cells[r][col]);
            if let Cell::Taken(mark) = a {
                if a == b && b == c {
                    return Some(Verdict::Winner(mark));
                }
            }
        }

        if self.is_full() {
            return Some(Verdict::Draw);
        }

        None
    }

    /// Write a mark into an empty cell of a live board
    pub fn place(&mut self, pos: Position, mark: Mark) -> Result<()> {
        if self.check_winner().is_some() {
            return Err(TttError::InvalidMove("board is already decided".into()));
        }
        if !self.get(pos).is_empty() {
            return Err(TttError::InvalidMove(format!("{} is occupied", pos)));
        }
        self.cells[pos.row as usize][pos.col as usize] = Cell::Taken(mark);
        Ok(())
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (r, row) in self.cells.iter().enumerate() {
            let rendered: Vec<&str> = row
                .iter()
                .map(|cell| cell.mark().map(Mark::as_str).unwrap_or(" "))
                .collect();
            writeln!(f, "{}", rendered.join("|"))?;
            if r < SIZE - 1 {
                writeln!(f, "-----")?;
            }
        }
        Ok(())
    }
}
