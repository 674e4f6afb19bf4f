//! # Diagnostics IPC Wire Format
//!
//! Defines the request and response framing spoken over a runtime's diagnostics
//! endpoint. Shared by the `pipetrace` client and by test doubles that play the
//! runtime side of the conversation.
//!
//! ## Message Layout
//!
//! Every message (both directions) starts with a fixed 20 byte header:
//!
//! ```text
//! ┌──────────────────────────┬──────────┬─────────┬─────────┬──────────┐
//! │ magic "DOTNET_IPC_V1\0"  │ size u16 │ set u8  │ id u8   │ rsvd u16 │
//! │        14 bytes          │   LE     │         │         │  always 0│
//! └──────────────────────────┴──────────┴─────────┴─────────┴──────────┘
//! ```
//!
//! `size` counts the header plus payload. All integers are little-endian.
//! Strings are a `u32` count of UTF-16 code units (terminator included)
//! followed by the UTF-16LE units; an absent string is a bare `0` count.
//!
//! ## Conversation
//!
//! 1. Client sends `CollectTracing2` (or the older `CollectTracing`).
//! 2. Runtime answers `Server/OK` with a `u64` session id, then keeps writing
//!    the trace stream on the same connection.
//! 3. To stop, the client opens a *second* connection and sends
//!    `StopTracing` with the session id. The runtime flushes and closes the
//!    first connection.

#![no_std]

extern crate alloc;

use alloc::vec::Vec;
use thiserror::Error;

// ============================================================================
// Header
// ============================================================================

/// Magic prefix of every IPC message
pub const IPC_MAGIC: &[u8; 14] = b"DOTNET_IPC_V1\0";

/// Size of the fixed message header in bytes
pub const HEADER_LEN: usize = 20;

/// First bytes of a trace stream in the `NetTrace` container format
pub const NETTRACE_MAGIC: &[u8; 8] = b"Nettrace";

/// Command set identifiers
pub mod command_set {
    /// Responses from the diagnostics server
    pub const SERVER: u8 = 0xFF;
    /// Tracing session management
    pub const EVENT_PIPE: u8 = 0x02;
}

/// Command ids within [`command_set::EVENT_PIPE`]
pub mod event_pipe {
    pub const STOP_TRACING: u8 = 0x01;
    pub const COLLECT_TRACING: u8 = 0x02;
    pub const COLLECT_TRACING_2: u8 = 0x03;
}

/// Command ids within [`command_set::SERVER`]
pub mod server {
    pub const OK: u8 = 0x00;
    pub const ERROR: u8 = 0xFF;
}

/// Trace serialization format requested from the runtime
pub mod format {
    pub const NET_PERF: u32 = 0;
    pub const NET_TRACE: u32 = 1;
}

// ============================================================================
// Error codes
// ============================================================================

/// HRESULT values a diagnostics server may return in an error response
pub mod hresult {
    pub const BAD_ENCODING: u32 = 0x8013_1384;
    pub const UNKNOWN_COMMAND: u32 = 0x8013_1385;
    pub const UNKNOWN_MAGIC: u32 = 0x8013_1386;
    pub const RUNTIME_UNINITIALIZED: u32 = 0x8013_1371;
    pub const NOT_YET_AVAILABLE: u32 = 0x8013_138B;
    pub const NOT_SUPPORTED: u32 = 0x8013_1515;
    pub const INVALID_ARG: u32 = 0x8007_0057;
    pub const OUT_OF_MEMORY: u32 = 0x8007_000E;
    pub const FAIL: u32 = 0x8000_4005;

    /// Short description of a known HRESULT
    #[must_use]
    pub fn describe(code: u32) -> &'static str {
        match code {
            BAD_ENCODING => "bad encoding",
            UNKNOWN_COMMAND => "unknown command",
            UNKNOWN_MAGIC => "unknown magic",
            RUNTIME_UNINITIALIZED => "runtime not initialized",
            NOT_YET_AVAILABLE => "not yet available",
            NOT_SUPPORTED => "not supported",
            INVALID_ARG => "invalid argument",
            OUT_OF_MEMORY => "out of memory",
            FAIL => "unspecified failure",
            _ => "unknown error",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("message of {0} bytes exceeds the 65535 byte limit")]
    MessageTooLarge(usize),

    #[error("header too short ({0} bytes)")]
    ShortHeader(usize),

    #[error("bad magic in message header")]
    BadMagic,

    #[error("header declares size {0}, smaller than the header itself")]
    BadSize(u16),

    #[error("payload too short: expected {expected} bytes, got {actual}")]
    ShortPayload { expected: usize, actual: usize },
}

/// Decoded message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcHeader {
    /// Total message size, header included
    pub size: u16,
    pub command_set: u8,
    pub command_id: u8,
}

impl IpcHeader {
    /// Serialize into the fixed 20 byte form
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..14].copy_from_slice(IPC_MAGIC);
        out[14..16].copy_from_slice(&self.size.to_le_bytes());
        out[16] = self.command_set;
        out[17] = self.command_id;
        // bytes 18..20 reserved, zero
        out
    }

    /// Parse a header from the first [`HEADER_LEN`] bytes of `bytes`
    ///
    /// # Errors
    /// Returns an error on short input, wrong magic, or a size smaller than the header
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::ShortHeader(bytes.len()));
        }
        if &bytes[..14] != IPC_MAGIC {
            return Err(WireError::BadMagic);
        }
        let size = u16::from_le_bytes([bytes[14], bytes[15]]);
        if usize::from(size) < HEADER_LEN {
            return Err(WireError::BadSize(size));
        }
        Ok(Self { size, command_set: bytes[16], command_id: bytes[17] })
    }

    /// Number of payload bytes following the header
    #[must_use]
    pub fn payload_len(&self) -> usize {
        usize::from(self.size) - HEADER_LEN
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.command_set == command_set::SERVER && self.command_id == server::OK
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.command_set == command_set::SERVER && self.command_id == server::ERROR
    }
}

// ============================================================================
// Requests
// ============================================================================

/// One provider entry of a collect request
#[derive(Debug, Clone, Copy)]
pub struct ProviderConfig<'a> {
    pub keywords: u64,
    pub level: u32,
    pub name: &'a str,
    /// Provider arguments, already joined as `key=value;key=value`
    pub filter_data: Option<&'a str>,
}

/// Parameters of a collect request
#[derive(Debug, Clone, Copy)]
pub struct CollectRequest<'a> {
    pub circular_buffer_mb: u32,
    pub format: u32,
    /// `Some` selects `CollectTracing2`, `None` the original `CollectTracing`
    pub request_rundown: Option<bool>,
    pub providers: &'a [ProviderConfig<'a>],
}

impl CollectRequest<'_> {
    /// Encode as a complete message, header included
    ///
    /// # Errors
    /// Returns [`WireError::MessageTooLarge`] when the provider list does not fit in one message
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut payload = Vec::with_capacity(128);
        payload.extend_from_slice(&self.circular_buffer_mb.to_le_bytes());
        payload.extend_from_slice(&self.format.to_le_bytes());
        let command_id = match self.request_rundown {
            Some(rundown) => {
                payload.push(u8::from(rundown));
                event_pipe::COLLECT_TRACING_2
            }
            None => event_pipe::COLLECT_TRACING,
        };

        let count = u32::try_from(self.providers.len())
            .map_err(|_| WireError::MessageTooLarge(usize::MAX))?;
        payload.extend_from_slice(&count.to_le_bytes());
        for provider in self.providers {
            payload.extend_from_slice(&provider.keywords.to_le_bytes());
            payload.extend_from_slice(&provider.level.to_le_bytes());
            write_string(&mut payload, Some(provider.name));
            write_string(&mut payload, provider.filter_data);
        }

        frame(command_set::EVENT_PIPE, command_id, &payload)
    }
}

/// Encode a `StopTracing` request for `session_id`
#[must_use]
pub fn encode_stop_tracing(session_id: u64) -> Vec<u8> {
    let payload = session_id.to_le_bytes();
    // Fixed size, always fits.
    frame(command_set::EVENT_PIPE, event_pipe::STOP_TRACING, &payload).unwrap_or_default()
}

/// Encode a `Server/OK` response carrying a session id
#[must_use]
pub fn encode_ok_session(session_id: u64) -> Vec<u8> {
    frame(command_set::SERVER, server::OK, &session_id.to_le_bytes()).unwrap_or_default()
}

/// Encode a `Server/Error` response carrying an HRESULT
#[must_use]
pub fn encode_error(code: u32) -> Vec<u8> {
    frame(command_set::SERVER, server::ERROR, &code.to_le_bytes()).unwrap_or_default()
}

fn frame(command_set: u8, command_id: u8, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let total = HEADER_LEN + payload.len();
    let size = u16::try_from(total).map_err(|_| WireError::MessageTooLarge(total))?;
    let header = IpcHeader { size, command_set, command_id };

    let mut message = Vec::with_capacity(total);
    message.extend_from_slice(&header.encode());
    message.extend_from_slice(payload);
    Ok(message)
}

fn write_string(out: &mut Vec<u8>, value: Option<&str>) {
    let Some(value) = value else {
        out.extend_from_slice(&0u32.to_le_bytes());
        return;
    };
    let units: Vec<u16> = value.encode_utf16().chain(core::iter::once(0)).collect();
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(units.len() as u32).to_le_bytes());
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Read the `u64` session id carried by an OK response payload
///
/// # Errors
/// Returns an error if the payload is shorter than eight bytes
pub fn decode_session_id(payload: &[u8]) -> Result<u64, WireError> {
    let bytes: [u8; 8] = payload
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or(WireError::ShortPayload { expected: 8, actual: payload.len() })?;
    Ok(u64::from_le_bytes(bytes))
}

/// Read the `u32` HRESULT carried by an error response payload
///
/// # Errors
/// Returns an error if the payload is shorter than four bytes
pub fn decode_error_code(payload: &[u8]) -> Result<u32, WireError> {
    let bytes: [u8; 4] = payload
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(WireError::ShortPayload { expected: 4, actual: payload.len() })?;
    Ok(u32::from_le_bytes(bytes))
}
