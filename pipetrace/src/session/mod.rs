//! # Diagnostic Sessions
//!
//! A session is a live data-collection handle opened against a running
//! process. It exposes two independent halves:
//!
//! - a **reader** yielding the raw trace stream until end-of-data
//! - a **stopper** that asks the runtime to end the session
//!
//! The halves are separate values so the drain loop can own the reader while
//! a stop reaction runs elsewhere. The collector only sees the [`Transport`]
//! and [`SessionStopper`] traits, so any transport (the Unix socket one in
//! [`ipc`], or an in-memory test double) plugs in unchanged.
//!
//! ```text
//!   Transport::open(pid, config)
//!            │
//!            ▼
//!   Session { id, reader, stopper }
//!            │                 │
//!   drain loop reads      stop reaction calls
//!   until EOF             stopper.stop() once
//! ```

pub mod endpoint;
pub mod ipc;

use std::future::Future;
use tokio::io::AsyncRead;

use crate::config::SessionConfig;
use crate::domain::{Pid, TransportError};

pub use ipc::{IpcStopper, IpcTransport};

/// An open session, split into its stream and its stop handle
pub struct Session<R, S> {
    /// Runtime-assigned session id
    pub id: u64,
    pub reader: R,
    pub stopper: S,
}

/// Ends a session on the target
///
/// `stop` must be safe to call after the stream is already exhausted.
pub trait SessionStopper: Send + Sync + 'static {
    fn stop(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Opens sessions against a process
pub trait Transport: Send + Sync {
    type Reader: AsyncRead + Unpin + Send;
    type Stopper: SessionStopper;

    /// Start a session on `pid` with the providers and buffer size in `config`
    fn open(
        &self,
        pid: Pid,
        config: &SessionConfig,
    ) -> impl Future<Output = Result<Session<Self::Reader, Self::Stopper>, TransportError>> + Send;
}
