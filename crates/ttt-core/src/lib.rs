//! # ttt-core
//!
//! Core types for the tic-tac-toe episode coordinator.
//!
//! This crate provides the foundational types used across the workspace:
//! - Board, cells, marks and positions
//! - Winner/draw evaluation
//! - Move and game outcomes
//! - The shared error type

pub mod board;
pub mod error;
pub mod outcome;

pub use board::{Board, Cell, Mark, Position, Verdict};
pub use error::{Result, TttError};
pub use outcome::{GameOutcome, MoveOutcome, MoveRecord};
