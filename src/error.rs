use std::fmt;
use std::process::ExitCode;

/// Errors that cause overseer to exit with a specific code.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },
}

impl ExitError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExitError::Config(_) => ExitCode::from(2),
            ExitError::ToolNotFound { .. } => ExitCode::from(3),
        }
    }
}

/// Which limit forced a reviewer to be terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Absolute wall-clock budget exceeded.
    Wall,
    /// No liveness signal for the configured stall window.
    Stall,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeoutKind::Wall => "wall-clock",
            TimeoutKind::Stall => "stall",
        })
    }
}

/// A supervised invocation was forcibly terminated.
///
/// Whatever the subprocess wrote before termination is retained in
/// `stdout`/`stderr` so callers can salvage partial output.
#[derive(Debug, thiserror::Error)]
#[error("{name} exceeded the {kind} limit of {limit_secs}s")]
pub struct TimeoutError {
    pub name: String,
    pub kind: TimeoutKind,
    pub limit_secs: u64,
    pub stdout: String,
    pub stderr: String,
}
