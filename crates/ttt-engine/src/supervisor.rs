//! Engine process supervision
//!
//! Spawns the engine, merges its stdout and stderr into one line stream,
//! and scans that stream for a readiness phrase before any request is sent.

use crate::channel::RpcChannel;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, error, info, warn};
use ttt_core::{Result, TttError};

/// Lowercase phrases that mark the engine as ready to accept requests
pub const READINESS_PHRASES: &[&str] = &[
    "connected to kaspa node successfully",
    "successfully connected to kaspa node",
    "continues in offline mode",
    "server continues in offline mode",
    "continue in offline mode",
    "finished dev",
    "finished `dev`",
    "running `target",
];

/// Sub-phrase of a readiness line that means the engine has no node connection
pub const OFFLINE_PHRASE: &str = "offline mode";

/// How to launch the engine
#[derive(Debug, Clone)]
pub struct EngineCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl EngineCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Split a whitespace-separated command line
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| TttError::Config("engine command is empty".into()))?;
        Ok(Self {
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
            cwd: None,
        })
    }
}

impl Default for EngineCommand {
    fn default() -> Self {
        Self::new("cargo")
            .arg("run")
            .arg("--bin")
            .arg("kdapp-mcp-server")
    }
}

/// Supervisor timing
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Window for a readiness phrase; covers a cold engine build
    pub startup_timeout: Duration,
    /// How long `terminate` waits for exit after the kill signal
    pub shutdown_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(90),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// A matched readiness line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub line: String,
    pub offline: bool,
}

/// Case-insensitive readiness check for one output line
pub fn match_readiness(line: &str) -> Option<Readiness> {
    let low = line.to_lowercase();
    READINESS_PHRASES
        .iter()
        .any(|phrase| low.contains(phrase))
        .then(|| Readiness {
            line: line.trim().to_string(),
            offline: low.contains(OFFLINE_PHRASE),
        })
}

/// A running engine that has signalled readiness
pub struct EngineProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Option<mpsc::UnboundedReceiver<String>>,
    readers: Vec<JoinHandle<()>>,
    readiness: Readiness,
    shutdown_grace: Duration,
}

impl EngineProcess {
    /// Launch the engine and wait for a readiness phrase
    pub async fn start(command: &EngineCommand, config: &SupervisorConfig) -> Result<Self> {
        info!("Starting engine: {} {}", command.program, command.args.join(" "));

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TttError::Spawn(format!("{}: {}", command.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TttError::Spawn("Failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TttError::Spawn("Failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TttError::Spawn("Failed to capture stderr".into()))?;

        // stdout and stderr feed one combined stream
        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        let readers = vec![
            tokio::spawn(forward_lines(stdout, line_tx.clone())),
            tokio::spawn(forward_lines(stderr, line_tx)),
        ];

        let mut process = Self {
            child,
            stdin: Some(stdin),
            lines: None,
            readers,
            readiness: Readiness {
                line: String::new(),
                offline: false,
            },
            shutdown_grace: config.shutdown_grace,
        };

        info!("Waiting for engine readiness (up to {:?})", config.startup_timeout);
        let deadline = Instant::now() + config.startup_timeout;
        loop {
            match timeout_at(deadline, line_rx.recv()).await {
                Ok(Some(line)) => {
                    debug!("[engine startup] {}", line.trim());
                    if let Some(readiness) = match_readiness(&line) {
                        info!(
                            "Engine is ready{}: {}",
                            if readiness.offline { " (offline mode)" } else { "" },
                            readiness.line
                        );
                        process.readiness = readiness;
                        break;
                    }
                }
                Ok(None) => {
                    let status = process.child.try_wait().ok().flatten();
                    error!("Engine output closed before readiness (status: {:?})", status);
                    process.terminate().await;
                    return Err(TttError::Spawn(format!(
                        "engine exited before signalling readiness (status: {:?})",
                        status
                    )));
                }
                Err(_) => {
                    error!("Timeout waiting for engine readiness");
                    let mut tail = Vec::new();
                    while let Ok(line) = line_rx.try_recv() {
                        tail.push(line);
                    }
                    if !tail.is_empty() {
                        warn!("[engine startup tail]\n{}", tail.join("\n"));
                    }
                    process.terminate().await;
                    return Err(TttError::StartupTimeout(config.startup_timeout));
                }
            }
        }

        process.lines = Some(line_rx);
        Ok(process)
    }

    /// True when the readiness line reported offline mode
    pub fn is_offline(&self) -> bool {
        self.readiness.offline
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Hand the engine's stdin and combined output to an RPC channel (once)
    pub fn take_channel(&mut self, default_timeout: Duration) -> Result<RpcChannel> {
        let stdin = self
            .stdin
            .take()
            .ok_or_else(|| TttError::Ipc("engine stdin already taken".into()))?;
        let lines = self
            .lines
            .take()
            .ok_or_else(|| TttError::Ipc("engine output already taken".into()))?;
        Ok(RpcChannel::new(stdin, lines, default_timeout))
    }

    /// Kill the engine and give it a short grace period to exit
    pub async fn terminate(&mut self) {
        self.stdin.take();
        if let Err(e) = self.child.start_kill() {
            debug!("Kill signal not delivered: {}", e);
        }
        match timeout(self.shutdown_grace, self.child.wait()).await {
            Ok(Ok(status)) => info!("Engine exited: {}", status),
            Ok(Err(e)) => warn!("Failed to reap engine: {}", e),
            Err(_) => warn!(
                "Engine did not exit within {:?}; leaving it",
                self.shutdown_grace
            ),
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Copy lines from one pipe into the combined stream until EOF
async fn forward_lines<R>(pipe: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Engine pipe read failed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_is_case_insensitive() {
        let ready = match_readiness("✅ Connected to Kaspa node successfully").unwrap();
        assert!(!ready.offline);

        let ready = match_readiness("    Finished `dev` profile [unoptimized] target(s) in 0.3s");
        assert!(ready.is_some());

        let ready = match_readiness("    Finished dev [unoptimized + debuginfo] target(s)").unwrap();
        assert!(!ready.offline);

        assert!(match_readiness("     Running `target/debug/kdapp-mcp-server`").is_some());
        assert!(match_readiness("   Compiling kdapp v0.1.0").is_none());
    }

    #[test]
    fn test_offline_flag_comes_from_matched_line() {
        let ready = match_readiness("   The server will continue in offline mode").unwrap();
        assert!(ready.offline);

        let ready = match_readiness("SERVER CONTINUES IN OFFLINE MODE").unwrap();
        assert!(ready.offline);
    }

    #[test]
    fn test_parse_command() {
        let cmd = EngineCommand::parse("cargo run --bin kdapp-mcp-server").unwrap();
        assert_eq!(cmd.program, "cargo");
        assert_eq!(cmd.args, vec!["run", "--bin", "kdapp-mcp-server"]);
        assert!(EngineCommand::parse("   ").is_err());
    }

    #[cfg(unix)]
    fn sh(script: &str) -> EngineCommand {
        EngineCommand::new("sh").arg("-c").arg(script)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_startup_timeout_without_readiness() {
        let config = SupervisorConfig {
            startup_timeout: Duration::from_millis(300),
            shutdown_grace: Duration::from_millis(500),
        };
        let result = EngineProcess::start(&sh("echo compiling; sleep 5"), &config).await;
        assert!(matches!(result, Err(TttError::StartupTimeout(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ready_from_stderr_in_offline_mode() {
        let config = SupervisorConfig {
            startup_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(500),
        };
        let script = "echo loading wallets; echo 'The server continues in offline mode' 1>&2; cat";
        let mut process = EngineProcess::start(&sh(script), &config).await.unwrap();
        assert!(process.is_offline());

        let channel = tokio_test::assert_ok!(process.take_channel(Duration::from_secs(1)));
        assert_eq!(channel.default_timeout(), Duration::from_secs(1));
        assert!(process.take_channel(Duration::from_secs(1)).is_err());

        process.terminate().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_before_readiness_is_reported() {
        let config = SupervisorConfig {
            startup_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(500),
        };
        let result = EngineProcess::start(&sh("echo boom; exit 3"), &config).await;
        assert!(matches!(result, Err(TttError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let result = EngineProcess::start(
            &EngineCommand::new("definitely-not-an-engine-binary"),
            &SupervisorConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(TttError::Spawn(_))));
    }
}
