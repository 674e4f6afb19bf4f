//! Pre-flight checks for pipetrace
//!
//! Validates the target and the output location before a session is opened,
//! so failures surface with clear messages instead of half-written traces.

#![allow(unsafe_code)] // kill(pid, 0) requires unsafe

use anyhow::{bail, Result};
use std::path::Path;

use crate::domain::{Pid, ResolutionError};

/// Whether `pid` names a live process
///
/// Signal 0 performs the existence and permission checks without delivering
/// anything. `EPERM` means the process exists but belongs to someone else.
#[must_use]
pub fn process_exists(pid: Pid) -> bool {
    if pid.0 <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid.0, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Check if the target process exists
///
/// # Errors
/// Returns [`ResolutionError::NoSuchPid`] when the process is gone
pub fn check_process_exists(pid: Pid) -> Result<(), ResolutionError> {
    if process_exists(pid) {
        Ok(())
    } else {
        Err(ResolutionError::NoSuchPid(pid.0))
    }
}

/// Check that the trace can be written to `path`
///
/// # Errors
/// Returns an error if `path` is a directory or its parent does not exist
pub fn check_output_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        bail!(
            "Output path is a directory: {}\n\n\
             --output must name a file, e.g. trace.nettrace",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.is_dir() {
            bail!(
                "Output directory not found: {}\n\n\
                 Create it first or choose another --output path.",
                parent.display()
            );
        }
    }
    Ok(())
}
