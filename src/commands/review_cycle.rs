//! `overseer review` - the multi-cycle document review loop.
//!
//! One or more reviewers take turns reviewing and updating a target
//! document. Each iteration's comments are persisted and handed to the
//! next reviewer, and the document is committed after every pass so the
//! history shows who changed what.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use minijinja::Environment;

use crate::config::{self, Config};
use crate::error::{ExitError, TimeoutError};
use crate::reviewer::Reviewer;
use crate::supervisor::{self, Limits};

const REVIEW_PROMPT_TEMPLATE: &str = include_str!("../templates/review-prompt.md.jinja");

#[derive(Debug, Args)]
pub struct ReviewArgs {
    /// Document to review
    pub doc: PathBuf,
    /// Number of review cycles
    #[arg(long)]
    pub cycles: Option<u32>,
    /// Add a reviewer by preset; can be repeated for multiple reviewers
    #[arg(long = "reviewer", value_name = "PRESET")]
    pub reviewers: Vec<String>,
    /// Custom shell command for a reviewer; pair each with --reviewer-name
    #[arg(long = "reviewer-cmd", value_name = "CMD")]
    pub reviewer_cmds: Vec<String>,
    /// Display name for a custom reviewer (matched to --reviewer-cmd by position)
    #[arg(long = "reviewer-name", value_name = "NAME")]
    pub reviewer_names: Vec<String>,
    /// Additional context included in every prompt; can be repeated
    #[arg(long = "context", value_name = "TEXT")]
    pub context: Vec<String>,
    /// File whose contents are included as additional context; can be repeated
    #[arg(long = "context-file", value_name = "FILE")]
    pub context_files: Vec<PathBuf>,
    /// Wall-clock limit per invocation in seconds (0 = no limit)
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Seconds of no activity before termination (0 = disabled)
    #[arg(long)]
    pub stall_timeout: Option<u64>,
    /// Seconds between liveness heartbeats (0 = disabled)
    #[arg(long)]
    pub heartbeat_secs: Option<u64>,
    /// Skip git commits after each review
    #[arg(long)]
    pub no_commit: bool,
    /// Disable automatic fallback to alternative reviewers on failure
    #[arg(long)]
    pub no_fallback: bool,
    /// Directory for reviewer comments (overrides the default)
    #[arg(long)]
    pub comments_dir: Option<PathBuf>,
}

impl ReviewArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        if !self.doc.exists() {
            return Err(ExitError::Config(format!(
                "document not found: {}",
                self.doc.display()
            ))
            .into());
        }

        let config = Config::load_or_default(Path::new("."))?;
        let review = &config.review;

        let cycles = self.cycles.unwrap_or(review.cycles);
        let limits = Limits::from_secs(
            self.timeout.unwrap_or(review.timeout),
            self.stall_timeout.unwrap_or(review.stall_timeout),
            self.heartbeat_secs.unwrap_or(review.heartbeat_secs),
        );
        let commit = !self.no_commit && review.commit;

        let reviewers = config::resolve_reviewers(
            &config,
            &self.reviewers,
            &self.reviewer_cmds,
            &self.reviewer_names,
            self.no_fallback,
        )?;
        let additional_context = collect_context(&self.context, &self.context_files)?;
        let cdir = self
            .comments_dir
            .clone()
            .unwrap_or_else(|| comments_dir(&review.comments_dir, &self.doc));

        print_banner(&self.doc, &cdir, &reviewers);

        // The supervised child shares our foreground process group, so
        // Ctrl-C reaches it directly; we only point at the partial results.
        let cdir_notice = cdir.clone();
        let _ = ctrlc::set_handler(move || {
            eprintln!(
                "\nInterrupted. Comments so far are in {}",
                cdir_notice.display()
            );
            std::process::exit(130);
        });

        run_loop(
            &self.doc,
            &reviewers,
            cycles,
            limits,
            commit,
            &cdir,
            additional_context.as_deref(),
        )
    }
}

fn print_banner(doc: &Path, cdir: &Path, reviewers: &[Reviewer]) {
    eprintln!();
    eprintln!(
        "  Started:    {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    eprintln!("  Document:   {}", doc.display());
    eprintln!("  Comments:   {}", cdir.display());
    for (i, reviewer) in reviewers.iter().enumerate() {
        let fb = reviewer
            .fallback
            .as_deref()
            .map(|f| format!(" (fallback: {})", f.name))
            .unwrap_or_default();
        let rl = reviewer
            .rate_limit_fallback
            .as_deref()
            .map(|f| format!(" (rate-limit: {})", f.name))
            .unwrap_or_default();
        eprintln!("  Reviewer {}: {}{fb}{rl}", i + 1, reviewer.name);
    }
    eprintln!();
}

fn run_loop(
    doc: &Path,
    reviewers: &[Reviewer],
    cycles: u32,
    limits: Limits,
    commit: bool,
    cdir: &Path,
    additional_context: Option<&str>,
) -> anyhow::Result<()> {
    let mut prev: Option<(PathBuf, String)> = None;

    for cycle in 1..=cycles {
        for reviewer in reviewers {
            let prompt = build_prompt(doc, prev.as_ref(), additional_context)?;

            let sep = "=".repeat(60);
            eprintln!("\n{sep}");
            eprintln!("  Cycle {cycle}/{cycles} - {} reviewing", reviewer.name);
            eprintln!("{sep}\n");

            let output = match reviewer.run(&prompt, limits) {
                Ok(output) => output,
                Err(err) => match err.downcast::<TimeoutError>() {
                    // An unrecovered timeout degrades to whatever partial
                    // output was captured; the loop keeps going.
                    Ok(timeout) => {
                        eprintln!(
                            "\n[TIMEOUT] {} exceeded the {} limit of {}s during \
                             cycle {cycle}. Partial output (if any) was captured.",
                            reviewer.name, timeout.kind, timeout.limit_secs,
                        );
                        timeout.stdout
                    }
                    Err(err) => return Err(err),
                },
            };

            let comments_path = save_comments(cdir, cycle, &reviewer.name, &output)?;
            eprintln!("\n[Saved comments to {}]", comments_path.display());
            prev = Some((comments_path, reviewer.name.clone()));

            if commit {
                let message = format!(
                    "update {} by {} (cycle {cycle})",
                    doc.display(),
                    reviewer.name
                );
                match commit_doc(doc, &message) {
                    Ok(()) => eprintln!("\n[Committed: {message}]"),
                    Err(err) => eprintln!("\n[Git commit failed: {err:#}]"),
                }
            }
        }
    }

    Ok(())
}

/// Render the review prompt for one iteration.
fn build_prompt(
    doc: &Path,
    prev: Option<&(PathBuf, String)>,
    additional_context: Option<&str>,
) -> anyhow::Result<String> {
    let mut env = Environment::new();
    env.add_template("review", REVIEW_PROMPT_TEMPLATE)
        .context("loading review prompt template")?;
    let template = env
        .get_template("review")
        .context("looking up review prompt template")?;
    let rendered = template
        .render(minijinja::context! {
            doc => doc.display().to_string(),
            prev_comments => prev.map(|(path, _)| path.display().to_string()),
            prev_reviewer => prev.map(|(_, name)| name.clone()),
            additional_context => additional_context,
        })
        .context("rendering review prompt")?;
    Ok(rendered)
}

/// Per-document comments directory under `base`.
///
/// Documents under a slug directory (e.g. `tasks/20260208-foo/plan.md`)
/// use the slug so all plans don't collide into `base/plan/`; anything
/// else falls back to the file stem.
fn comments_dir(base: &Path, doc: &Path) -> PathBuf {
    let parent = doc
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str());
    match parent {
        Some(name) if !matches!(name, "docs" | "todo") => base.join(name),
        _ => base.join(
            doc.file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("doc"),
        ),
    }
}

/// Persist reviewer output as `cycle{N}_{slug}.txt` under `cdir`.
fn save_comments(
    cdir: &Path,
    cycle: u32,
    reviewer_name: &str,
    output: &str,
) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(cdir).with_context(|| format!("creating {}", cdir.display()))?;
    let path = cdir.join(format!("cycle{cycle}_{}.txt", supervisor::slug(reviewer_name)));
    fs::write(&path, output).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Stage the document and create a signed commit containing only it.
fn commit_doc(doc: &Path, message: &str) -> anyhow::Result<()> {
    let doc = doc.to_string_lossy();
    supervisor::run_command("git", &["add", &doc], None)?;
    supervisor::run_command("git", &["commit", "--only", &doc, "-s", "-m", message], None)?;
    Ok(())
}

/// Concatenate inline context and context-file contents.
fn collect_context(texts: &[String], files: &[PathBuf]) -> anyhow::Result<Option<String>> {
    let mut parts: Vec<String> = texts.to_vec();
    for path in files {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading context file {}", path.display()))?;
        parts.push(content);
    }
    Ok((!parts.is_empty()).then(|| parts.join("\n\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_iteration_prompt_has_no_handoff() {
        let prompt = build_prompt(Path::new("docs/design.md"), None, None).unwrap();
        assert!(prompt.contains("Please review docs/design.md"));
        assert!(!prompt.contains("previous reviewer"));
        assert!(!prompt.contains("ADDITIONAL CONTEXT"));
    }

    #[test]
    fn later_iterations_reference_previous_comments() {
        let prev = (
            PathBuf::from("review_comments/design/cycle1_claude_cli.txt"),
            "Claude CLI".to_string(),
        );
        let prompt = build_prompt(Path::new("docs/design.md"), Some(&prev), None).unwrap();
        assert!(prompt.contains("The previous reviewer (Claude CLI) left comments in"));
        assert!(prompt.contains("cycle1_claude_cli.txt"));
        assert!(prompt.contains("independent perspective"));
    }

    #[test]
    fn additional_context_is_appended() {
        let prompt = build_prompt(
            Path::new("docs/design.md"),
            None,
            Some("Focus on security implications"),
        )
        .unwrap();
        assert!(prompt.contains("--- ADDITIONAL CONTEXT ---"));
        assert!(prompt.ends_with("Focus on security implications"));
    }

    #[test]
    fn comments_dir_uses_slug_directory() {
        let base = Path::new("review_comments");
        assert_eq!(
            comments_dir(base, Path::new("tasks/20260208-foo/plan.md")),
            base.join("20260208-foo")
        );
        assert_eq!(
            comments_dir(base, Path::new("docs/autoep-design.md")),
            base.join("autoep-design")
        );
        assert_eq!(comments_dir(base, Path::new("notes.md")), base.join("notes"));
    }

    #[test]
    fn comments_are_saved_per_cycle_and_reviewer() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_comments(dir.path(), 2, "Cursor / GPT 5.2 Codex XHigh", "looks good").unwrap();
        assert!(path.ends_with("cycle2_cursor_gpt_5_2_codex_xhigh.txt"));
        assert_eq!(fs::read_to_string(path).unwrap(), "looks good");
    }

    #[test]
    fn context_collection_concatenates_text_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("constraints.md");
        fs::write(&file, "from file").unwrap();

        let combined = collect_context(&["inline".to_string()], &[file]).unwrap().unwrap();
        assert_eq!(combined, "inline\n\nfrom file");

        assert!(collect_context(&[], &[]).unwrap().is_none());
    }

    #[test]
    fn missing_context_file_is_an_error() {
        let err = collect_context(&[], &[PathBuf::from("/nonexistent/ctx.md")]).unwrap_err();
        assert!(err.to_string().contains("context file"));
    }
}
