//! `overseer init` - write a commented starter `.overseer.toml`.

use std::fs;
use std::path::Path;

use anyhow::Context;
use clap::Args;
use toml_edit::{DocumentMut, Item};

use crate::config::{CONFIG_TOML, Config};
use crate::error::ExitError;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Overwrite an existing .overseer.toml
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let path = Path::new(CONFIG_TOML);
        if path.exists() && !self.force {
            return Err(ExitError::Config(format!(
                "{CONFIG_TOML} already exists (use --force to overwrite)"
            ))
            .into());
        }

        fs::write(path, starter_config()?).with_context(|| format!("writing {CONFIG_TOML}"))?;
        eprintln!("Wrote {CONFIG_TOML}");
        Ok(())
    }
}

/// The default config serialized with explanatory comments.
fn starter_config() -> anyhow::Result<String> {
    let defaults = toml::to_string(&Config::default()).context("serializing default config")?;
    let mut doc: DocumentMut = defaults
        .parse()
        .context("reparsing default config for annotation")?;

    doc.decor_mut()
        .set_prefix("# Overseer project configuration\n\n");
    if let Some(review) = doc.get_mut("review").and_then(Item::as_table_mut) {
        review
            .decor_mut()
            .set_prefix("# Review-loop defaults; CLI flags override per run.\n# timeout/stall_timeout/heartbeat_secs are in seconds, 0 disables.\n");
    }
    if let Some(presets) = doc.get_mut("presets").and_then(Item::as_table_mut) {
        presets.decor_mut().set_prefix(
            "\n# Extra reviewer presets, or overrides of the built-in ones\n\
             # (claude, codex, cursor-opus, cursor-gpt). Example:\n\
             #\n\
             # [presets.my-tool]\n\
             # name = \"My Tool\"\n\
             # cmd = \"my-tool review\"\n\
             # probe = \"generic\"\n\
             # fallback = \"codex\"\n",
        );
    }

    Ok(doc.to_string())
}
