//! Supervised execution of one reviewer subprocess.
//!
//! The subprocess reads its prompt from a file and writes stdout/stderr
//! to log files in a fresh directory, so nothing flows through pipes and
//! the polling loop can never deadlock against a full pipe buffer. Each
//! poll samples several independent liveness signals (output growth, own
//! CPU time, process-tree CPU time, probe events); any one of them
//! resets the stall clock, because an agent can be silent on stdout yet
//! computing, or CPU-idle yet still flushing. Wall-clock and stall
//! limits terminate the process with a SIGTERM then SIGKILL escalation.
//! Invocation directories are left on disk so a human can tail the logs
//! live and inspect them afterwards.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::Context;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::error::{ExitError, TimeoutError, TimeoutKind};
use crate::probe::{ProbeKind, ProbeState};
use crate::procinfo;

/// Captured output of a completed invocation.
#[derive(Debug)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Limits and reporting cadence for one invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Limits {
    pub timeout: Option<Duration>,
    pub stall_timeout: Option<Duration>,
    pub heartbeat: Option<Duration>,
}

impl Limits {
    /// Build limits from seconds values where `0` disables a limit.
    pub fn from_secs(timeout: u64, stall_timeout: u64, heartbeat: u64) -> Self {
        let opt = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
        Self {
            timeout: opt(timeout),
            stall_timeout: opt(stall_timeout),
            heartbeat: opt(heartbeat),
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_SLICE: Duration = Duration::from_millis(100);
const KILL_GRACE: Duration = Duration::from_secs(5);
const PROGRESS_EMIT_EVERY: u64 = 20;
const PROGRESS_EMIT_SECS: u64 = 15;

/// Run `cmd` with `prompt` on stdin under the given limits.
///
/// Returns the captured output, or a [`TimeoutError`] carrying whatever
/// the subprocess wrote before it was terminated.
pub fn execute(
    name: &str,
    cmd: &str,
    probe: ProbeKind,
    prompt: &str,
    limits: Limits,
) -> anyhow::Result<ExecOutput> {
    let argv = shlex::split(cmd)
        .filter(|argv| !argv.is_empty())
        .ok_or_else(|| ExitError::Config(format!("unparseable reviewer command: {cmd}")))?;
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ExitError::Config(format!("empty reviewer command: {cmd}")))?;

    let invocation = InvocationDir::create(name, prompt)?;

    let prompt_file = File::open(&invocation.prompt_path)
        .with_context(|| format!("opening {}", invocation.prompt_path.display()))?;
    let stdout_file = File::create(&invocation.stdout_path)
        .with_context(|| format!("creating {}", invocation.stdout_path.display()))?;
    let stderr_file = File::create(&invocation.stderr_path)
        .with_context(|| format!("creating {}", invocation.stderr_path.display()))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::from(prompt_file))
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file))
        .spawn()
        .map_err(|e| -> anyhow::Error {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExitError::ToolNotFound {
                    tool: program.clone(),
                }
                .into()
            } else {
                anyhow::Error::new(e).context(format!("spawning {program}"))
            }
        })?;

    let pid = child.id();
    eprintln!("[{name}] stdout -> {}", invocation.stdout_path.display());
    eprintln!("[{name}] stderr -> {}", invocation.stderr_path.display());
    eprintln!("[{name}] pid={pid}");
    eprintln!("[{name}] probe={probe}");
    tracing::debug!(pid, name, "spawned reviewer process");

    let start = Instant::now();
    let deadline = limits.timeout.map(|t| start + t);
    let mut next_heartbeat = limits.heartbeat.map(|h| start + h);

    let mut last_activity = start;
    let mut last_output = start;
    let mut last_size: u64 = 0;
    let mut last_cpu = procinfo::cpu_seconds(pid);
    let mut last_cpu_tree = procinfo::tree_cpu_seconds(pid);
    let mut cpu_now = last_cpu;
    let mut cpu_tree_now = last_cpu_tree;

    let mut probe_state = ProbeState::new();
    let mut last_progress_emit = start;
    let mut last_progress_count = 0u64;

    let mut timed_out: Option<(TimeoutKind, u64)> = None;

    loop {
        if child
            .try_wait()
            .with_context(|| format!("waiting for {name}"))?
            .is_some()
        {
            break;
        }

        let now = Instant::now();
        let mut sleep_time = POLL_INTERVAL;
        if let Some(deadline) = deadline {
            if now >= deadline {
                terminate(&mut child);
                timed_out = Some((
                    TimeoutKind::Wall,
                    limits.timeout.unwrap_or_default().as_secs(),
                ));
                break;
            }
            sleep_time = sleep_time.min(deadline.duration_since(now));
        }
        if let Some(heartbeat_at) = next_heartbeat {
            sleep_time = sleep_time.min(heartbeat_at.saturating_duration_since(now).max(WAIT_SLICE));
        }

        // Wake immediately when the process exits instead of always
        // sleeping the full poll interval.
        if wait_timeout(&mut child, sleep_time)?.is_some() {
            break;
        }

        // Liveness signal 1: combined output file growth.
        let current_size = invocation.output_size().unwrap_or(last_size);
        if current_size > last_size {
            last_size = current_size;
            last_activity = Instant::now();
            last_output = last_activity;
        }

        // Liveness signals 2 and 3: CPU movement, own and whole tree.
        cpu_now = procinfo::cpu_seconds(pid);
        if let (Some(current), Some(previous)) = (cpu_now, last_cpu)
            && current > previous
        {
            last_activity = Instant::now();
        }
        if cpu_now.is_some() {
            last_cpu = cpu_now;
        }
        cpu_tree_now = procinfo::tree_cpu_seconds(pid);
        if let (Some(current), Some(previous)) = (cpu_tree_now, last_cpu_tree)
            && current > previous
        {
            last_activity = Instant::now();
        }
        if cpu_tree_now.is_some() {
            last_cpu_tree = cpu_tree_now;
        }

        // Liveness signal 4: probe-detected progress events.
        probe_state.update(probe, &invocation.stdout_path);
        if probe_state.progress_count > last_progress_count {
            last_activity = Instant::now();
            let now = Instant::now();
            let should_emit = probe_state.progress_count - last_progress_count
                >= PROGRESS_EMIT_EVERY
                || now.duration_since(last_progress_emit).as_secs() >= PROGRESS_EMIT_SECS;
            if should_emit {
                eprintln!(
                    "[PROGRESS] {name}: progress_events={}, last={}",
                    probe_state.progress_count,
                    probe_state.last_progress.as_deref().unwrap_or("n/a"),
                );
                last_progress_emit = now;
            }
            last_progress_count = probe_state.progress_count;
        }

        let now = Instant::now();
        if let (Some(heartbeat_at), Some(interval)) = (next_heartbeat, limits.heartbeat)
            && now >= heartbeat_at
        {
            emit_heartbeat(
                name,
                probe,
                &probe_state,
                now.duration_since(start),
                now.duration_since(last_activity),
                now.duration_since(last_output),
                last_size,
                cpu_now,
                cpu_tree_now,
            );
            next_heartbeat = Some(now + interval);
        }

        if let Some(stall) = limits.stall_timeout {
            let stalled_for = now.duration_since(last_activity);
            if stalled_for >= stall {
                eprintln!(
                    "[STALL-TIMEOUT] {name}: no output or CPU activity for {} \
                     (limit: {}). Terminating reviewer.",
                    format_duration(stalled_for),
                    format_duration(stall),
                );
                terminate(&mut child);
                timed_out = Some((TimeoutKind::Stall, stall.as_secs()));
                break;
            }
        }
    }

    // Reap synchronously; the child flushed its side of the log files on
    // exit, so reading back now sees everything it wrote.
    let status = child
        .wait()
        .with_context(|| format!("waiting for {name}"))?;
    let stdout = read_lossy(&invocation.stdout_path);
    let stderr = read_lossy(&invocation.stderr_path);
    let final_size = invocation.output_size().unwrap_or(last_size);

    eprintln!(
        "[{name}] finished rc={}, output={}",
        status.code().unwrap_or(-1),
        format_bytes(final_size),
    );

    if let Some((kind, limit_secs)) = timed_out {
        return Err(TimeoutError {
            name: name.to_string(),
            kind,
            limit_secs,
            stdout,
            stderr,
        }
        .into());
    }

    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code: status.code().unwrap_or(-1),
    })
}

#[allow(clippy::too_many_arguments)]
fn emit_heartbeat(
    name: &str,
    probe: ProbeKind,
    probe_state: &ProbeState,
    elapsed: Duration,
    idle: Duration,
    output_idle: Duration,
    output_size: u64,
    cpu: Option<f64>,
    cpu_tree: Option<f64>,
) {
    let cpu_total = cpu.map_or_else(|| "n/a".to_string(), |c| format!("{c:.1}s"));
    let cpu_tree_total = cpu_tree.map_or_else(|| "n/a".to_string(), |c| format!("{c:.1}s"));
    let probe_info = if probe.is_structured() {
        format!(
            ", progress_events={}, last_progress={}, final_events={}, last_final={}",
            probe_state.progress_count,
            probe_state.last_progress.as_deref().unwrap_or("n/a"),
            probe_state.final_count,
            probe_state.last_final.as_deref().unwrap_or("n/a"),
        )
    } else {
        String::new()
    };
    eprintln!(
        "[HEARTBEAT] {name}: elapsed={}, idle={}, output_idle={}, output={}, \
         cpu_root={cpu_total}, cpu_tree={cpu_tree_total}{probe_info}",
        format_duration(elapsed),
        format_duration(idle),
        format_duration(output_idle),
        format_bytes(output_size),
    );
}

/// Poll `try_wait` in short slices for up to `dur`, returning the exit
/// status as soon as the process exits.
fn wait_timeout(child: &mut Child, dur: Duration) -> anyhow::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + dur;
    loop {
        if let Some(status) = child.try_wait().context("polling subprocess")? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(WAIT_SLICE.min(deadline.duration_since(now)));
    }
}

/// Two-phase termination: SIGTERM, then SIGKILL after a grace period.
fn terminate(child: &mut Child) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }
    // An ESRCH here just means the process beat us to exiting.
    let _ = signal::kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);

    let deadline = Instant::now() + KILL_GRACE;
    while Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        std::thread::sleep(WAIT_SLICE);
    }
    tracing::debug!(pid = child.id(), "grace period expired, escalating to SIGKILL");
    let _ = child.kill();
}

fn read_lossy(path: &Path) -> String {
    fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// On-disk layout for one invocation: prompt plus both log files in a
/// fresh directory. Kept after completion for inspection.
struct InvocationDir {
    pub prompt_path: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

impl InvocationDir {
    fn create(name: &str, prompt: &str) -> anyhow::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("reviewer_{}_", slug(name)))
            .tempdir()
            .context("creating invocation directory")?
            .keep();
        let prompt_path = dir.join("prompt.txt");
        fs::write(&prompt_path, prompt)
            .with_context(|| format!("writing {}", prompt_path.display()))?;
        Ok(Self {
            prompt_path,
            stdout_path: dir.join("stdout.log"),
            stderr_path: dir.join("stderr.log"),
        })
    }

    /// Combined size of both log files.
    fn output_size(&self) -> Option<u64> {
        let stdout = fs::metadata(&self.stdout_path).ok()?.len();
        let stderr = fs::metadata(&self.stderr_path).ok()?.len();
        Some(stdout + stderr)
    }
}

fn re_non_alnum() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"[^a-z0-9]+").unwrap())
}

/// Filesystem-safe slug of a display name.
pub fn slug(name: &str) -> String {
    let lowered = name.to_lowercase();
    re_non_alnum()
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

/// Compact duration for diagnostics: `45s`, `2m05s`, `1h02m03s`.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (mins, sec) = (total / 60, total % 60);
    let (hrs, mins) = (mins / 60, mins % 60);
    if hrs > 0 {
        format!("{hrs}h{mins:02}m{sec:02}s")
    } else if mins > 0 {
        format!("{mins}m{sec:02}s")
    } else {
        format!("{sec}s")
    }
}

/// Short human-readable byte count.
pub fn format_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

/// Run a command with args, optionally in a specific directory.
/// Returns stdout on success, or an error including stderr.
pub fn run_command(program: &str, args: &[&str], cwd: Option<&Path>) -> anyhow::Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = cmd.output().with_context(|| format!("running {program}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        anyhow::bail!(
            "{program} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )
    }
}
