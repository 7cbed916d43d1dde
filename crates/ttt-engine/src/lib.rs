//! Engine process supervision and RPC for the episode coordinator
//!
//! This crate provides:
//! - `EngineProcess`: launches the engine, waits for a readiness phrase, tears it down
//! - `RpcChannel`: newline-framed JSON-RPC over the engine's stdin and combined output
//! - `EngineClient`: typed wrappers for the kdapp tools the coordinator consumes
//!
//! The engine interleaves log output and JSON responses on one stream. The
//! channel therefore treats the first line that parses as JSON as the answer
//! to the single outstanding request, skipping only replies whose id shows
//! they belong to an earlier, timed-out request. A replacement protocol
//! should use explicit framing and full id correlation.

pub mod channel;
pub mod client;
pub mod supervisor;

pub use channel::{RpcChannel, RpcErrorObject, RpcResponse};
pub use client::{AgentPubkeys, EngineClient, EpisodeHandle};
pub use supervisor::{EngineCommand, EngineProcess, Readiness, SupervisorConfig, match_readiness};
