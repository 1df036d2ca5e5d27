//! Reviewer invocation targets and fallback-aware orchestration.

use std::collections::HashSet;

use crate::error::TimeoutError;
use crate::extract;
use crate::probe::ProbeKind;
use crate::supervisor::{self, Limits};

/// One CLI reviewer: how to invoke it and where to go when it fails.
///
/// `fallback` is tried on timeout or non-zero exit; `rate_limit_fallback`
/// is preferred when the output shows a provider rate limit. The links
/// form a chain resolved once at configuration time and shared read-only
/// by every invocation.
#[derive(Debug, Clone)]
pub struct Reviewer {
    pub name: String,
    pub cmd: String,
    pub probe: ProbeKind,
    pub fallback: Option<Box<Reviewer>>,
    pub rate_limit_fallback: Option<Box<Reviewer>>,
}

impl Reviewer {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>, probe: ProbeKind) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            probe,
            fallback: None,
            rate_limit_fallback: None,
        }
    }

    /// Run the reviewer and return the extracted answer text.
    ///
    /// Checked in priority order after each attempt: a timeout recurses
    /// into `fallback` when one is configured and otherwise propagates
    /// as [`TimeoutError`]; a rate-limited run prefers
    /// `rate_limit_fallback` over `fallback`; a non-zero exit tries
    /// `fallback`. When no fallback applies, rate limits and failures
    /// degrade to a warning plus best-effort extraction of whatever was
    /// captured. Each reviewer name is tried at most once per call, so
    /// cyclic fallback chains terminate.
    pub fn run(&self, prompt: &str, limits: Limits) -> anyhow::Result<String> {
        let mut visited = HashSet::new();
        self.run_with_visited(prompt, limits, &mut visited)
    }

    fn run_with_visited(
        &self,
        prompt: &str,
        limits: Limits,
        visited: &mut HashSet<String>,
    ) -> anyhow::Result<String> {
        visited.insert(self.name.clone());

        let result = supervisor::execute(&self.name, &self.cmd, self.probe, prompt, limits);

        let output = match result {
            Ok(output) => output,
            Err(err) => match err.downcast::<TimeoutError>() {
                Ok(timeout) => {
                    let Some(fb) = untried(self.fallback.as_deref(), visited) else {
                        return Err(timeout.into());
                    };
                    eprintln!(
                        "\n[FALLBACK] {} timed out ({}) after {}s, falling back to {}",
                        self.name, timeout.kind, timeout.limit_secs, fb.name,
                    );
                    return fb.run_with_visited(prompt, limits, visited);
                }
                Err(err) => return Err(err),
            },
        };

        // Rate-limit check takes priority over generic non-zero exit.
        if is_rate_limited(&output.stdout, &output.stderr) {
            let fb = untried(self.rate_limit_fallback.as_deref(), visited)
                .or_else(|| untried(self.fallback.as_deref(), visited));
            if let Some(fb) = fb {
                eprintln!(
                    "\n[RATE LIMIT] {} hit a rate limit, falling back to {}",
                    self.name, fb.name,
                );
                return fb.run_with_visited(prompt, limits, visited);
            }
            eprintln!(
                "\n[RATE LIMIT] {} hit a rate limit and no fallback is available",
                self.name,
            );
        }

        if !output.success() {
            eprintln!(
                "[WARNING] {} exited with code {}",
                self.name, output.exit_code,
            );
            if let Some(fb) = untried(self.fallback.as_deref(), visited) {
                eprintln!("[FALLBACK] Falling back to {}", fb.name);
                return fb.run_with_visited(prompt, limits, visited);
            }
        }

        Ok(extract::final_output(self.probe, &output.stdout))
    }
}

fn untried<'a>(candidate: Option<&'a Reviewer>, visited: &HashSet<String>) -> Option<&'a Reviewer> {
    candidate.filter(|reviewer| !visited.contains(&reviewer.name))
}

/// Substrings that mark provider rate limiting in reviewer output.
const RATE_LIMIT_PATTERNS: [&str; 7] = [
    "rate_limit",
    "rate limit",
    "usage_limit",
    "usage limit",
    "429 too many",
    "http 429",
    "too many requests",
];

/// True when stdout/stderr contains a rate-limit indicator.
pub fn is_rate_limited(stdout: &str, stderr: &str) -> bool {
    let combined = format!("{stdout}\n{stderr}").to_lowercase();
    RATE_LIMIT_PATTERNS
        .iter()
        .any(|pattern| combined.contains(pattern))
}
