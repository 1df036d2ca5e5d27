//! Best-effort /proc sampling for subprocess liveness.
//!
//! Everything here returns `Option`: a process may exit between the
//! existence check and the read, and non-Linux /proc layouts simply
//! yield no samples. The supervisor treats a missing sample as "no
//! evidence of activity", never as an error.

use std::collections::HashSet;
use std::fs;

/// User + system CPU seconds for one process, from `/proc/<pid>/stat`.
pub fn cpu_seconds(pid: u32) -> Option<f64> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let ticks = parse_stat_cpu_ticks(&stat)?;
    Some(ticks as f64 / clock_ticks_per_sec())
}

/// Total CPU seconds for the process tree rooted at `root`.
///
/// Returns `None` only when not a single process in the tree could be
/// sampled (e.g. the whole tree already exited).
pub fn tree_cpu_seconds(root: u32) -> Option<f64> {
    let mut seen = HashSet::new();
    let mut queue = vec![root];
    let mut total = 0.0;
    let mut sampled = false;

    while let Some(pid) = queue.pop() {
        if !seen.insert(pid) {
            continue;
        }
        if let Some(cpu) = cpu_seconds(pid) {
            total += cpu;
            sampled = true;
        }
        for child in children(pid) {
            if !seen.contains(&child) {
                queue.push(child);
            }
        }
    }

    sampled.then_some(total)
}

/// utime + stime ticks from a stat line.
///
/// The comm field may itself contain spaces and parens, so fields are
/// located relative to the last closing paren rather than by naive
/// whitespace splitting.
fn parse_stat_cpu_ticks(stat: &str) -> Option<u64> {
    let rest = stat.get(stat.rfind(')')? + 1..)?;
    let mut fields = rest.split_whitespace();
    // rest starts at field 3 (state); utime and stime are fields 14 and 15.
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}

fn clock_ticks_per_sec() -> f64 {
    // SAFETY: sysconf is a pure query with no preconditions.
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz > 0 { hz as f64 } else { 100.0 }
}

/// Child PIDs from `/proc/<pid>/task/<pid>/children`.
fn children(pid: u32) -> Vec<u32> {
    fs::read_to_string(format!("/proc/{pid}/task/{pid}/children"))
        .map(|raw| {
            raw.split_whitespace()
                .filter_map(|token| token.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}
