//! Reviewer presets, fallback wiring, and the `.overseer.toml` config.
//!
//! Four presets are built in (claude, codex, cursor-opus, cursor-gpt);
//! a project config can override them or add its own. Resolution
//! happens once at startup and produces immutable [`Reviewer`] values
//! that every invocation shares.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;
use crate::probe::ProbeKind;
use crate::reviewer::Reviewer;

/// Config file name.
pub const CONFIG_TOML: &str = ".overseer.toml";

/// Top-level .overseer.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub review: ReviewConfig,
    /// Extra presets, or overrides of the built-in ones, keyed by preset id.
    #[serde(default)]
    pub presets: BTreeMap<String, PresetConfig>,
}

/// Review-loop defaults; CLI flags override per run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReviewConfig {
    /// Number of review cycles.
    #[serde(default = "default_cycles")]
    pub cycles: u32,
    /// Wall-clock limit per invocation in seconds; 0 disables.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// No-activity limit per invocation in seconds; 0 disables.
    #[serde(default)]
    pub stall_timeout: u64,
    /// Seconds between liveness heartbeats; 0 disables.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    /// Commit the reviewed document after each iteration.
    #[serde(default = "default_true")]
    pub commit: bool,
    /// Base directory for reviewer comments.
    #[serde(default = "default_comments_dir")]
    pub comments_dir: PathBuf,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            cycles: default_cycles(),
            timeout: default_timeout(),
            stall_timeout: 0,
            heartbeat_secs: default_heartbeat(),
            commit: default_true(),
            comments_dir: default_comments_dir(),
        }
    }
}

// Default value functions for serde
fn default_cycles() -> u32 {
    3
}
fn default_timeout() -> u64 {
    1800
}
fn default_heartbeat() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_comments_dir() -> PathBuf {
    PathBuf::from("review_comments")
}

/// One invocation target as written in config.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PresetConfig {
    /// Display name, e.g. "Claude CLI".
    pub name: String,
    /// Shell-splittable command template; the prompt arrives on stdin.
    pub cmd: String,
    /// Output format the command emits on stdout.
    #[serde(default)]
    pub probe: ProbeKind,
    /// Preset tried when this one times out or exits non-zero.
    #[serde(default)]
    pub fallback: Option<String>,
    /// Preset preferred when this one hits a provider rate limit.
    #[serde(default)]
    pub rate_limit_fallback: Option<String>,
}

/// Built-in preset table; config entries override by key.
pub fn builtin_presets() -> BTreeMap<String, PresetConfig> {
    let mut presets = BTreeMap::new();
    presets.insert(
        "claude".to_string(),
        PresetConfig {
            name: "Claude CLI".to_string(),
            cmd: "claude --dangerously-skip-permissions -p \
                  --output-format stream-json --include-partial-messages --verbose"
                .to_string(),
            probe: ProbeKind::ClaudeStreamJson,
            fallback: Some("codex".to_string()),
            rate_limit_fallback: Some("codex".to_string()),
        },
    );
    presets.insert(
        "codex".to_string(),
        PresetConfig {
            name: "Codex CLI".to_string(),
            cmd: "codex --dangerously-bypass-approvals-and-sandbox exec --json".to_string(),
            probe: ProbeKind::CodexJson,
            fallback: Some("cursor-gpt".to_string()),
            rate_limit_fallback: Some("cursor-gpt".to_string()),
        },
    );
    presets.insert(
        "cursor-opus".to_string(),
        PresetConfig {
            name: "Cursor / Opus 4.6 Thinking".to_string(),
            cmd: "cursor agent -p -f --model opus-4.6-thinking".to_string(),
            probe: ProbeKind::Generic,
            fallback: None,
            rate_limit_fallback: Some("cursor-gpt".to_string()),
        },
    );
    presets.insert(
        "cursor-gpt".to_string(),
        PresetConfig {
            name: "Cursor / GPT 5.2 Codex XHigh".to_string(),
            cmd: "cursor agent -p -f --model gpt-5.2-codex-xhigh".to_string(),
            probe: ProbeKind::Generic,
            fallback: None,
            rate_limit_fallback: Some("cursor-opus".to_string()),
        },
    );
    presets
}

/// Find the config file in `dir`, if present.
pub fn find_config(dir: &Path) -> Option<PathBuf> {
    let path = dir.join(CONFIG_TOML);
    path.exists().then_some(path)
}

impl Config {
    /// Load the config from `dir`, or fall back to the defaults.
    pub fn load_or_default(dir: &Path) -> anyhow::Result<Self> {
        match find_config(dir) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse_toml(&raw)
    }

    pub fn parse_toml(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw)
            .map_err(|e| ExitError::Config(format!("invalid {CONFIG_TOML}: {e}")).into())
    }

    /// Built-in presets merged with config overrides.
    pub fn presets(&self) -> BTreeMap<String, PresetConfig> {
        let mut merged = builtin_presets();
        for (key, preset) in &self.presets {
            merged.insert(key.clone(), preset.clone());
        }
        merged
    }

    /// Materialize a preset key into a [`Reviewer`] with its fallback chain.
    pub fn resolve_preset(&self, key: &str, no_fallback: bool) -> anyhow::Result<Reviewer> {
        let presets = self.presets();
        let mut on_chain = HashSet::new();
        build_reviewer(key, &presets, no_fallback, &mut on_chain).ok_or_else(|| {
            let known = presets.keys().cloned().collect::<Vec<_>>().join(", ");
            ExitError::Config(format!("unknown preset '{key}'. Choose from: {known}")).into()
        })
    }
}

/// Build a reviewer, following fallback links transitively.
///
/// A link that revisits a key already on the current chain is dropped,
/// so cyclic config degrades to its acyclic prefix instead of recursing
/// forever. Returns `None` for unknown keys.
fn build_reviewer(
    key: &str,
    presets: &BTreeMap<String, PresetConfig>,
    no_fallback: bool,
    on_chain: &mut HashSet<String>,
) -> Option<Reviewer> {
    let preset = presets.get(key)?;
    if !on_chain.insert(key.to_string()) {
        return None;
    }

    let mut reviewer = Reviewer::new(preset.name.clone(), preset.cmd.clone(), preset.probe);
    if !no_fallback {
        reviewer.fallback = preset
            .fallback
            .as_deref()
            .and_then(|next| build_reviewer(next, presets, no_fallback, on_chain))
            .map(Box::new);
        reviewer.rate_limit_fallback = preset
            .rate_limit_fallback
            .as_deref()
            .and_then(|next| build_reviewer(next, presets, no_fallback, on_chain))
            .map(Box::new);
    }

    on_chain.remove(key);
    Some(reviewer)
}

/// Resolve the reviewer list from CLI flags, or interactively when
/// nothing was specified.
///
/// Resolution order: presets (`--reviewer`, repeatable), then custom
/// command/name pairs (matched by position), then the interactive
/// picker.
pub fn resolve_reviewers(
    config: &Config,
    preset_keys: &[String],
    custom_cmds: &[String],
    custom_names: &[String],
    no_fallback: bool,
) -> anyhow::Result<Vec<Reviewer>> {
    let mut reviewers = Vec::new();

    for key in preset_keys {
        reviewers.push(config.resolve_preset(key, no_fallback)?);
    }

    if custom_cmds.len() != custom_names.len() {
        return Err(ExitError::Config(format!(
            "--reviewer-cmd and --reviewer-name must be specified the same number \
             of times (got {} commands and {} names)",
            custom_cmds.len(),
            custom_names.len(),
        ))
        .into());
    }
    for (cmd, name) in custom_cmds.iter().zip(custom_names) {
        reviewers.push(Reviewer::new(name.clone(), cmd.clone(), ProbeKind::Generic));
    }

    if reviewers.is_empty() {
        reviewers = pick_reviewers_interactively(config)?;
    }
    if reviewers.is_empty() {
        return Err(ExitError::Config("at least one reviewer is required".to_string()).into());
    }

    Ok(reviewers)
}

fn pick_reviewers_interactively(config: &Config) -> anyhow::Result<Vec<Reviewer>> {
    use dialoguer::{Input, Select};

    let presets = config.presets();
    let keys: Vec<&String> = presets.keys().collect();
    let labels: Vec<String> = keys
        .iter()
        .map(|key| format!("{}  [{key}]", presets[key.as_str()].name))
        .collect();

    let count: usize = Input::new()
        .with_prompt("How many reviewers")
        .default(2)
        .interact_text()
        .context("reading reviewer count")?;

    let mut reviewers = Vec::new();
    for i in 1..=count {
        let choice = Select::new()
            .with_prompt(format!("Reviewer {i}"))
            .items(&labels)
            .default(0)
            .interact()
            .context("selecting reviewer")?;
        reviewers.push(config.resolve_preset(keys[choice], false)?);
    }
    Ok(reviewers)
}
