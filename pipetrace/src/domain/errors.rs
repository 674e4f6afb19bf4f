//! Structured error types for pipetrace
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Pid;
use pipetrace_common::{hresult, WireError};
use std::path::PathBuf;
use thiserror::Error;

/// The target process could not be identified
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Missing process ID/name")]
    MissingSelector,

    #[error("Could not find process with ID '{0}'")]
    NoSuchPid(i32),

    #[error("Could not find process with name '{0}'")]
    NoSuchName(String),

    #[error("Multiple processes match '{name}':\n{candidates}\n\nSpecify the process ID instead")]
    Ambiguous { name: String, candidates: String },

    #[error("Failed to list diagnostics endpoints in {}: {source}", .path.display())]
    EndpointDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The diagnostics transport failed to talk to the runtime
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No diagnostics endpoint for process {pid} in {}", .dir.display())]
    EndpointNotFound { pid: Pid, dir: PathBuf },

    #[error("Failed to connect to {}: {source}", .path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Diagnostics server rejected {command}: {} (0x{code:08X})", hresult::describe(*.code))]
    Rejected { command: &'static str, code: u32 },

    #[error("Unexpected response to {command}: command set 0x{command_set:02X}, id 0x{command_id:02X}")]
    UnexpectedResponse { command: &'static str, command_set: u8, command_id: u8 },

    #[error("Malformed diagnostics message: {0}")]
    Wire(#[from] WireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the runtime refused the request because it does not know the command
    #[must_use]
    pub fn is_unknown_command(&self) -> bool {
        matches!(self, TransportError::Rejected { code, .. } if *code == hresult::UNKNOWN_COMMAND)
    }

    /// Whether the failure was a permission problem on the endpoint
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        match self {
            TransportError::Connect { source, .. } | TransportError::Io(source) => {
                source.kind() == std::io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}

/// Invalid session configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Circular buffer size must be at least 1 MB")]
    ZeroBufferSize,

    #[error("At least one provider must be enabled")]
    NoProviders,

    #[error("Invalid provider spec '{spec}': {reason}")]
    InvalidProviderSpec { spec: String, reason: String },

    #[error("Unknown event level '{0}'")]
    UnknownLevel(String),

    #[error("Failed to read providers file {}: {source}", .path.display())]
    ProvidersFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid providers file {}: {source}", .path.display())]
    ProvidersFileInvalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A trace collection failed
#[derive(Error, Debug)]
pub enum CollectError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Failed to open session on process {pid}: {source}")]
    SessionOpen {
        pid: Pid,
        #[source]
        source: TransportError,
    },

    #[error("Failed to write trace data: {0}")]
    SinkWrite(#[source] std::io::Error),

    #[error("Failed to read session stream: {0}")]
    StreamRead(#[source] std::io::Error),

    #[error("Failed to stop session {session_id}: {source}")]
    Stop {
        session_id: u64,
        #[source]
        source: TransportError,
    },

    #[error("Failed to create trace output file {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
