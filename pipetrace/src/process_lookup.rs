//! Resolve a process selector (pid or name) to a traceable process.

use std::fs;
use std::path::Path;

use crate::domain::{Pid, ResolutionError};
use crate::preflight::process_exists;
use crate::session::endpoint::published_processes;

/// Result of process lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub command: String,
}

/// Resolve `selector` to a single process.
///
/// A numeric selector must name a live process. Anything else is matched,
/// case-insensitively, as a substring of the command name or executable
/// basename of the processes publishing an endpoint in `socket_dir`.
///
/// # Errors
/// - Empty selector
/// - No process with that pid, or no process matching the name
/// - Multiple processes match the name (ambiguous)
pub fn resolve_process(selector: &str, socket_dir: &Path) -> Result<ProcessInfo, ResolutionError> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(ResolutionError::MissingSelector);
    }

    if let Ok(id) = selector.parse::<i32>() {
        let pid = Pid(id);
        if !process_exists(pid) {
            return Err(ResolutionError::NoSuchPid(id));
        }
        let command = process_name(pid).unwrap_or_else(|| "unknown".to_string());
        return Ok(ProcessInfo { pid, command });
    }

    let mut matches: Vec<ProcessInfo> = list_published(socket_dir)?
        .into_iter()
        .filter(|info| is_match(&info.command, exe_basename(info.pid).as_deref(), selector))
        .collect();

    match matches.len() {
        0 => Err(ResolutionError::NoSuchName(selector.to_string())),
        1 => Ok(matches.remove(0)),
        _ => {
            let list: Vec<String> =
                matches.iter().map(|m| format!("  {} ({})", m.pid.0, m.command)).collect();
            Err(ResolutionError::Ambiguous { name: selector.to_string(), candidates: list.join("\n") })
        }
    }
}

/// Live processes publishing a diagnostics endpoint in `socket_dir`.
///
/// Stale sockets of exited processes are skipped.
///
/// # Errors
/// Returns an error if `socket_dir` cannot be read
pub fn list_published(socket_dir: &Path) -> Result<Vec<ProcessInfo>, ResolutionError> {
    let pids = published_processes(socket_dir).map_err(|source| {
        ResolutionError::EndpointDirUnreadable { path: socket_dir.to_path_buf(), source }
    })?;

    Ok(pids
        .into_iter()
        .filter(|pid| process_exists(*pid))
        .map(|pid| ProcessInfo { pid, command: process_name(pid).unwrap_or_default() })
        .collect())
}

/// Command name from `/proc/<pid>/stat`.
fn process_name(pid: Pid) -> Option<String> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid.0)).ok()?;
    extract_comm(&stat).map(str::to_string)
}

fn exe_basename(pid: Pid) -> Option<String> {
    let exe = fs::read_link(format!("/proc/{}/exe", pid.0)).ok()?;
    exe.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Extract command name from `/proc/<pid>/stat`.
/// Format: "pid (comm) state ..."
fn extract_comm(stat_line: &str) -> Option<&str> {
    let open = stat_line.find('(')?;
    let close = stat_line.rfind(')')?;
    if open >= close {
        return None;
    }
    Some(&stat_line[open + 1..close])
}

/// Case-insensitive substring match on command name or executable basename.
fn is_match(command: &str, exe_basename: Option<&str>, pattern: &str) -> bool {
    let pattern = pattern.to_lowercase();
    command.to_lowercase().contains(&pattern)
        || exe_basename.is_some_and(|exe| exe.to_lowercase().contains(&pattern))
}
