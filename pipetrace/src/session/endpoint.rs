//! Diagnostics endpoint discovery
//!
//! A runtime publishes its endpoint as a Unix socket named
//! `dotnet-diagnostic-{pid}-{key}-socket` in the temp directory.

use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::domain::{Pid, TransportError};

const SOCKET_PREFIX: &str = "dotnet-diagnostic-";
const SOCKET_SUFFIX: &str = "-socket";

/// Directory runtimes publish their endpoints in (`$TMPDIR`, else `/tmp`)
#[must_use]
pub fn default_socket_dir() -> PathBuf {
    std::env::var_os("TMPDIR")
        .filter(|dir| !dir.is_empty())
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
}

/// Extract the pid from an endpoint file name
fn parse_endpoint_name(name: &str) -> Option<i32> {
    let rest = name.strip_prefix(SOCKET_PREFIX)?.strip_suffix(SOCKET_SUFFIX)?;
    let (pid, key) = rest.split_once('-')?;
    if key.is_empty() {
        return None;
    }
    pid.parse().ok()
}

/// Locate the endpoint socket of `pid` in `dir`
///
/// A runtime that restarted under a recycled pid can leave a stale socket
/// behind, so the most recently modified candidate wins.
///
/// # Errors
/// Returns [`TransportError::EndpointNotFound`] when no socket exists for `pid`
pub fn find_endpoint(dir: &Path, pid: Pid) -> Result<PathBuf, TransportError> {
    let not_found = || TransportError::EndpointNotFound { pid, dir: dir.to_path_buf() };
    let entries = fs::read_dir(dir).map_err(|_| not_found())?;

    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if parse_endpoint_name(&name.to_string_lossy()) != Some(pid.0) {
            continue;
        }
        let modified =
            entry.metadata().and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
        if best.as_ref().is_none_or(|(t, _)| modified > *t) {
            best = Some((modified, entry.path()));
        }
    }

    let (_, path) = best.ok_or_else(not_found)?;
    debug!("Diagnostics endpoint for {pid}: {}", path.display());
    Ok(path)
}

/// Pids of all processes publishing an endpoint in `dir`, ascending
///
/// # Errors
/// Returns an error if `dir` cannot be read
pub fn published_processes(dir: &Path) -> io::Result<Vec<Pid>> {
    let mut pids: Vec<Pid> = fs::read_dir(dir)?
        .flatten()
        .filter_map(|entry| parse_endpoint_name(&entry.file_name().to_string_lossy()))
        .map(Pid)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    Ok(pids)
}
