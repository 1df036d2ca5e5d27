//! `overseer run` - one supervised reviewer invocation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;

use crate::config::Config;
use crate::error::ExitError;
use crate::probe::ProbeKind;
use crate::reviewer::Reviewer;
use crate::supervisor::Limits;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Reviewer preset to invoke (claude, codex, cursor-opus, cursor-gpt,
    /// or a key defined in .overseer.toml)
    #[arg(long, conflicts_with = "cmd")]
    pub reviewer: Option<String>,
    /// Custom command template to invoke instead of a preset
    #[arg(long, requires = "name")]
    pub cmd: Option<String>,
    /// Display name for --cmd
    #[arg(long)]
    pub name: Option<String>,
    /// Prompt text
    #[arg(short, long, conflicts_with = "prompt_file")]
    pub prompt: Option<String>,
    /// Read the prompt from a file
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,
    /// Wall-clock limit in seconds (0 = no limit)
    #[arg(long, default_value_t = 1800)]
    pub timeout: u64,
    /// Seconds of no output/CPU/probe activity before termination (0 = disabled)
    #[arg(long, default_value_t = 0)]
    pub stall_timeout: u64,
    /// Seconds between liveness heartbeats (0 = disabled)
    #[arg(long, default_value_t = 30)]
    pub heartbeat_secs: u64,
    /// Disable automatic fallback to alternative reviewers on failure
    #[arg(long)]
    pub no_fallback: bool,
}

impl RunArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let config = Config::load_or_default(Path::new("."))?;

        let reviewer = if let Some(key) = &self.reviewer {
            config.resolve_preset(key, self.no_fallback)?
        } else if let Some(cmd) = &self.cmd {
            let name = self.name.clone().unwrap_or_else(|| "custom".to_string());
            Reviewer::new(name, cmd.clone(), ProbeKind::Generic)
        } else {
            return Err(ExitError::Config("--reviewer or --cmd is required".to_string()).into());
        };

        let prompt = match (&self.prompt, &self.prompt_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => fs::read_to_string(path)
                .with_context(|| format!("reading prompt file {}", path.display()))?,
            (None, None) => {
                return Err(
                    ExitError::Config("either --prompt or --prompt-file is required".to_string())
                        .into(),
                );
            }
        };

        let limits = Limits::from_secs(self.timeout, self.stall_timeout, self.heartbeat_secs);
        let answer = reviewer.run(&prompt, limits)?;
        println!("{answer}");
        Ok(())
    }
}
