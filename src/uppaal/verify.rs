// src/uppaal/verify.rs

//! Running `verifyta` and parsing its trace.
//!
//! The verifier is asked for the fastest trace (`-t 2 -o 3 -u -y`); the
//! satisfaction summary arrives on stdout, the trace on stderr. The trace's
//! final line carries the makespan as the last value of the global clock;
//! its transition blocks yield who worked, transported, and activated what.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use regex::Regex;
use tracing::debug;
use wait_timeout::ChildExt;

use super::model::ModelMaps;
use crate::error::{Error, Result};
use crate::plant::ActiveWorks;

/// What one verifier run produced.
#[derive(Debug, Clone)]
pub struct VerifierOutput {
    /// The satisfaction summary (stdout).
    pub summary: String,
    /// The trace (stderr).
    pub trace: String,
}

/// Run the verifier on a model and query file, asking for the fastest
/// trace. The child is killed if it exceeds `timeout`.
pub fn run_verifyta(
    verifyta: &Path,
    model: &Path,
    queries: &Path,
    timeout: Duration,
) -> Result<VerifierOutput> {
    debug!("running {} on {}", verifyta.display(), model.display());
    let mut child = Command::new(verifyta)
        .arg(model)
        .arg(queries)
        .args(["-t", "2", "-o", "3", "-u", "-y"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            Error::VerifierError(format!("failed to launch {}: {}", verifyta.display(), e))
        })?;

    // Drain both pipes on their own threads; a fastest-trace run can emit
    // more than a pipe buffer holds.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_thread = thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut buffer);
        }
        buffer
    });
    let stderr_thread = thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut buffer);
        }
        buffer
    });

    match child.wait_timeout(timeout)? {
        Some(_status) => {}
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::VerifierError(format!(
                "verifier exceeded its {}s budget",
                timeout.as_secs()
            )));
        }
    }

    Ok(VerifierOutput {
        summary: stdout_thread.join().unwrap_or_default(),
        trace: stderr_thread.join().unwrap_or_default(),
    })
}

/// Whether the verifier reported the reachability property satisfied.
pub fn property_satisfied(summary: &str) -> bool {
    !summary.is_empty() && !summary.contains("Formula is NOT satisfied")
}

/// The last value of the named clock, read from the trace's final line.
pub fn trace_time(trace: &str, clock: &str) -> Result<u64> {
    let last = trace
        .lines()
        .last()
        .ok_or_else(|| Error::TraceError("trace is empty".to_string()))?;
    let pattern = Regex::new(&format!(r"{}.?=(\d+)", clock))
        .map_err(|e| Error::TraceError(e.to_string()))?;
    let captures = pattern.captures(last).ok_or_else(|| {
        Error::TraceError(format!("no {} value on the final trace line", clock))
    })?;
    captures[1]
        .parse()
        .map_err(|_| Error::TraceError(format!("bad {} value on the final trace line", clock)))
}

/// Extract, per module, the recipes worked on, the recipes transported
/// through, and the work types activated, from the trace's transition
/// blocks.
pub fn traversal_info(
    trace: &str,
    maps: &ModelMaps,
) -> Result<(ActiveWorks, ActiveWorks, ActiveWorks)> {
    let int_pattern = Regex::new(r"\d+").map_err(|e| Error::TraceError(e.to_string()))?;
    let bracket_pattern =
        Regex::new(r"\[(\d+)\]").map_err(|e| Error::TraceError(e.to_string()))?;
    let var_pattern = Regex::new(r"var=(\d+)").map_err(|e| Error::TraceError(e.to_string()))?;

    let mut worked = ActiveWorks::new();
    let mut transported = ActiveWorks::new();
    let mut active = ActiveWorks::new();

    let mut lines = trace.lines();
    while let Some(line) = lines.next() {
        if line != "Transitions:" {
            continue;
        }
        let first = lines.next().unwrap_or_default();
        let second = lines.next().unwrap_or_default();

        // A handshake: the module performs the recipe's current work.
        if first.contains("handshake") {
            let recipe_id = first_int(&int_pattern, first)?;
            let module_id = first_int(&int_pattern, second)?;
            let module = lookup(&maps.modules, module_id, "module")?;
            let recipe = lookup(&maps.recipes, recipe_id, "recipe")?;
            entry(&mut worked, module).insert(recipe);
        }

        if first.contains("work") && first.contains("Handshaking") {
            let module_id = first_int(&int_pattern, first)?;
            let module = lookup(&maps.modules, module_id, "module")?;
            let work_id = bracket_pattern
                .captures(second)
                .and_then(|c| c[1].parse::<i64>().ok())
                .ok_or_else(|| {
                    Error::TraceError(format!("no bracketed work id in '{}'", second))
                })?;
            let work = lookup(&maps.works, work_id, "work type")?;
            entry(&mut active, module).insert(work);
        } else if first.contains("enqueue") && first.contains("mtransporter") {
            let module_id = first_int(&int_pattern, first)?;
            let module = lookup(&maps.modules, module_id, "module")?;
            // The recipe id rides in the global var of the state five lines
            // further down.
            let state_line = lines.nth(4).ok_or_else(|| {
                Error::TraceError("transition block truncated before its state".to_string())
            })?;
            let recipe_id = var_pattern
                .captures(state_line)
                .and_then(|c| c[1].parse::<i64>().ok())
                .ok_or_else(|| {
                    Error::TraceError(format!("no global var value in '{}'", state_line))
                })?;
            let recipe = lookup(&maps.recipes, recipe_id, "recipe")?;
            entry(&mut transported, module).insert(recipe);
        }
    }

    Ok((worked, transported, active))
}

fn first_int(pattern: &Regex, line: &str) -> Result<i64> {
    pattern
        .find(line)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| Error::TraceError(format!("no integer in trace line '{}'", line)))
}

fn lookup(
    map: &std::collections::HashMap<i64, String>,
    id: i64,
    kind: &str,
) -> Result<String> {
    map.get(&id)
        .cloned()
        .ok_or_else(|| Error::TraceError(format!("unknown {} id {} in trace", kind, id)))
}

fn entry<'a>(map: &'a mut ActiveWorks, key: String) -> &'a mut BTreeSet<String> {
    map.entry(key).or_default()
}
