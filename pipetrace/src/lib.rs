//! # pipetrace - On-Demand Runtime Trace Capture
//!
//! pipetrace attaches to a running .NET process through its diagnostics
//! endpoint, enables a set of event providers, and streams the resulting
//! `NetTrace` data into a file or any async writer, for a fixed duration or
//! until cancelled. The target keeps running; nothing is restarted.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Target Process                             │
//! │            (runtime with diagnostics server enabled)            │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ $TMPDIR/dotnet-diagnostic-{pid}-{key}-socket
//!                         │ CollectTracing2 / StopTracing
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     pipetrace (This Crate)                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Session    │──▶│  Collector   │──▶│ Output sink  │         │
//! │  │ (transport)  │   │ (drain loop) │   │ (.nettrace)  │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │         ▲                   │                                   │
//! │         │ stop()            │ stop signal (timer / token)       │
//! │         └───────────────────┘                                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`collector`]: [`TraceCollector`] and the stop/drain protocol
//! - [`session`]: transport-agnostic session traits and the IPC transport
//!   - `endpoint`: diagnostics socket discovery
//!   - `ipc`: request/response conversation with the runtime
//! - [`config`]: [`SessionConfig`], providers, default provider table
//! - [`process_lookup`]: resolve a pid or name to a traceable process
//! - [`preflight`]: liveness and output-path checks
//! - [`cli`]: command-line argument parsing
//! - [`domain`]: core domain types ([`Pid`]) and errors
//!
//! ## Typical Usage
//!
//! ```bash
//! # Trace a process by name until Ctrl+C
//! pipetrace -p my-service
//!
//! # Trace pid 1234 for 30 seconds into a custom file
//! pipetrace -p 1234 --duration 30 -o startup.nettrace
//!
//! # See which processes can be traced
//! pipetrace --list
//! ```
//!
//! From code:
//!
//! ```rust,ignore
//! let collector = TraceCollector::new(SessionConfig::default());
//! let summary = collector.collect_to_path("self.nettrace", Duration::from_secs(5)).await?;
//! ```

pub mod cli;
pub mod collector;
pub mod config;
pub mod domain;
pub mod preflight;
pub mod process_lookup;
pub mod session;

pub use collector::{CollectSummary, StopCause, StopCondition, TraceCollector};
pub use config::{EventLevel, Provider, SessionConfig};
pub use domain::{CollectError, Pid};
