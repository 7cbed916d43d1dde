//! Coordinator configuration
//!
//! Defaults match a local kdapp engine built with cargo and two LLM
//! endpoints on the WSL host. Every value can be overridden through
//! `TTT_*` environment variables:
//!
//! - `TTT_ENGINE_CMD`: engine command line (default: `cargo run --bin kdapp-mcp-server`)
//! - `TTT_STARTUP_TIMEOUT_SECS`, `TTT_RPC_TIMEOUT_SECS`, `TTT_SUGGEST_TIMEOUT_SECS`
//! - `TTT_AGENT_HOST`: host for both agents (default: resolv.conf nameserver)
//! - `TTT_AGENT1_URL`, `TTT_AGENT1_MODEL`, `TTT_AGENT2_URL`, `TTT_AGENT2_MODEL`
//! - `TTT_KEYS_DIR`: key store root (default: `./agent_keys`)
//! - `TTT_REQUIRE_ONCHAIN`: force enforcement on/off (default: on unless the engine is offline)
//! - `TTT_MAX_FAILURES`: consecutive failed plies before abandoning (default: 3)

use std::path::PathBuf;
use std::time::Duration;
use ttt_core::{Result, TttError};
use ttt_engine::{EngineCommand, SupervisorConfig};

/// An LLM endpoint used as a suggestion source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEndpoint {
    pub url: String,
    pub model: String,
}

/// Everything needed for one coordinated game
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub engine: EngineCommand,
    pub supervisor: SupervisorConfig,
    /// Per-call deadline for engine requests
    pub rpc_timeout: Duration,
    /// Per-request deadline for suggestion sources
    pub suggestion_timeout: Duration,
    /// Chat-completions endpoint playing X
    pub agent1: AgentEndpoint,
    /// Generate endpoint playing O
    pub agent2: AgentEndpoint,
    /// Query the agents at all; otherwise both sides use the picker
    pub use_agents: bool,
    pub keys_dir: PathBuf,
    /// `None` derives enforcement from the engine's offline flag
    pub require_onchain: Option<bool>,
    pub max_consecutive_failures: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::with_agent_host("127.0.0.1")
    }
}

impl CoordinatorConfig {
    fn with_agent_host(host: &str) -> Self {
        Self {
            engine: EngineCommand::default(),
            supervisor: SupervisorConfig::default(),
            rpc_timeout: Duration::from_secs(5),
            suggestion_timeout: Duration::from_secs(30),
            agent1: AgentEndpoint {
                url: format!("http://{}:1234", host),
                model: "gemma-3-270m-it-qat".into(),
            },
            agent2: AgentEndpoint {
                url: format!("http://{}:11434", host),
                model: "gemma3:270m".into(),
            },
            use_agents: true,
            keys_dir: PathBuf::from("agent_keys"),
            require_onchain: None,
            max_consecutive_failures: 3,
        }
    }

    /// Load from process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("TTT_AGENT_HOST").unwrap_or_else(detect_agent_host);
        let mut config = Self::with_agent_host(&host);

        if let Some(cmd) = lookup("TTT_ENGINE_CMD") {
            config.engine = EngineCommand::parse(&cmd)?;
        }
        if let Some(secs) = lookup("TTT_STARTUP_TIMEOUT_SECS") {
            config.supervisor.startup_timeout = parse_secs("TTT_STARTUP_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("TTT_RPC_TIMEOUT_SECS") {
            config.rpc_timeout = parse_secs("TTT_RPC_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("TTT_SUGGEST_TIMEOUT_SECS") {
            config.suggestion_timeout = parse_secs("TTT_SUGGEST_TIMEOUT_SECS", &secs)?;
        }
        if let Some(url) = lookup("TTT_AGENT1_URL") {
            config.agent1.url = url;
        }
        if let Some(model) = lookup("TTT_AGENT1_MODEL") {
            config.agent1.model = model;
        }
        if let Some(url) = lookup("TTT_AGENT2_URL") {
            config.agent2.url = url;
        }
        if let Some(model) = lookup("TTT_AGENT2_MODEL") {
            config.agent2.model = model;
        }
        if let Some(dir) = lookup("TTT_KEYS_DIR") {
            config.keys_dir = PathBuf::from(dir);
        }
        if let Some(flag) = lookup("TTT_REQUIRE_ONCHAIN") {
            config.require_onchain = Some(parse_bool("TTT_REQUIRE_ONCHAIN", &flag)?);
        }
        if let Some(max) = lookup("TTT_MAX_FAILURES") {
            config.max_consecutive_failures = max
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| TttError::Config(format!("TTT_MAX_FAILURES: invalid count '{}'", max)))?;
        }

        Ok(config)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| TttError::Config(format!("{}: invalid seconds '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TttError::Config(format!("{}: invalid flag '{}'", key, value))),
    }
}

/// First `nameserver` entry of a resolv.conf
pub fn nameserver_from(resolv_conf: &str) -> Option<String> {
    resolv_conf
        .lines()
        .filter_map(|line| line.trim().strip_prefix("nameserver"))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(str::to_string)
        .next()
}

/// Host the agents run on: the WSL host's nameserver, else loopback
pub fn detect_agent_host() -> String {
    std::fs::read_to_string("/etc/resolv.conf")
        .ok()
        .and_then(|text| nameserver_from(&text))
        .unwrap_or_else(|| "127.0.0.1".to_string())
}
