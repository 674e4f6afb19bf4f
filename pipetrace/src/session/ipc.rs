//! # Diagnostics IPC Transport
//!
//! Talks to a runtime's diagnostics server over its Unix domain socket.
//!
//! ## Opening
//!
//! 1. Locate `dotnet-diagnostic-{pid}-*-socket` (see [`super::endpoint`])
//! 2. Send `CollectTracing2` with the buffer size, rundown flag and providers
//! 3. Read the reply; `OK` carries the session id and the connection then
//!    becomes the trace stream
//!
//! Runtimes that predate `CollectTracing2` answer "unknown command"; the
//! transport then reconnects and retries with `CollectTracing`, which has no
//! rundown flag.
//!
//! ## Stopping
//!
//! `StopTracing` travels on a fresh connection. The runtime flushes what it
//! has buffered into the stream connection and closes it, which the drain
//! loop sees as end-of-data.

use log::{debug, info};
use pipetrace_common::{
    decode_error_code, decode_session_id, encode_stop_tracing, format, CollectRequest, IpcHeader,
    ProviderConfig, HEADER_LEN,
};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use super::endpoint::{default_socket_dir, find_endpoint};
use super::{Session, SessionStopper, Transport};
use crate::config::SessionConfig;
use crate::domain::{Pid, TransportError};

const COLLECT_TRACING: &str = "CollectTracing";
const COLLECT_TRACING_2: &str = "CollectTracing2";
const STOP_TRACING: &str = "StopTracing";

/// Session transport over the runtime's diagnostics socket
#[derive(Debug, Clone)]
pub struct IpcTransport {
    socket_dir: PathBuf,
}

impl Default for IpcTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl IpcTransport {
    /// Transport looking for endpoints in the default temp directory
    #[must_use]
    pub fn new() -> Self {
        Self::with_socket_dir(default_socket_dir())
    }

    #[must_use]
    pub fn with_socket_dir(socket_dir: impl Into<PathBuf>) -> Self {
        Self { socket_dir: socket_dir.into() }
    }

    #[must_use]
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    /// Send one collect request on a fresh connection
    ///
    /// `request_rundown` of `None` selects the legacy `CollectTracing` command.
    async fn start(
        &self,
        endpoint: &Path,
        config: &SessionConfig,
        request_rundown: Option<bool>,
    ) -> Result<Session<UnixStream, IpcStopper>, TransportError> {
        let filters: Vec<Option<String>> =
            config.providers().iter().map(crate::config::Provider::filter_data).collect();
        let providers: Vec<ProviderConfig<'_>> = config
            .providers()
            .iter()
            .zip(&filters)
            .map(|(provider, filter)| ProviderConfig {
                keywords: provider.keyword_mask(),
                level: provider.level.as_u32(),
                name: &provider.name,
                filter_data: filter.as_deref(),
            })
            .collect();

        let message = CollectRequest {
            circular_buffer_mb: config.circular_buffer_mb(),
            format: format::NET_TRACE,
            request_rundown,
            providers: &providers,
        }
        .encode()?;

        let command = if request_rundown.is_some() { COLLECT_TRACING_2 } else { COLLECT_TRACING };
        let mut stream = connect(endpoint).await?;
        let payload = round_trip(&mut stream, command, &message).await?;
        let session_id = decode_session_id(&payload)?;

        Ok(Session {
            id: session_id,
            reader: stream,
            stopper: IpcStopper { endpoint: endpoint.to_path_buf(), session_id },
        })
    }
}

impl Transport for IpcTransport {
    type Reader = UnixStream;
    type Stopper = IpcStopper;

    async fn open(
        &self,
        pid: Pid,
        config: &SessionConfig,
    ) -> Result<Session<UnixStream, IpcStopper>, TransportError> {
        let endpoint = find_endpoint(&self.socket_dir, pid)?;

        let session = match self.start(&endpoint, config, Some(config.request_rundown())).await {
            Err(e) if e.is_unknown_command() => {
                info!("{pid} does not support {COLLECT_TRACING_2}, retrying with {COLLECT_TRACING}");
                self.start(&endpoint, config, None).await?
            }
            other => other?,
        };

        info!(
            "Started session {} on {pid} ({} providers, {} MB buffer)",
            session.id,
            config.providers().len(),
            config.circular_buffer_mb()
        );
        Ok(session)
    }
}

/// Stops one session by id over a separate connection
#[derive(Debug, Clone)]
pub struct IpcStopper {
    endpoint: PathBuf,
    session_id: u64,
}

impl IpcStopper {
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.session_id
    }
}

impl SessionStopper for IpcStopper {
    async fn stop(&self) -> Result<(), TransportError> {
        debug!("Sending {STOP_TRACING} for session {}", self.session_id);
        let mut stream = connect(&self.endpoint).await?;
        round_trip(&mut stream, STOP_TRACING, &encode_stop_tracing(self.session_id)).await?;
        Ok(())
    }
}

async fn connect(endpoint: &Path) -> Result<UnixStream, TransportError> {
    UnixStream::connect(endpoint)
        .await
        .map_err(|source| TransportError::Connect { path: endpoint.to_path_buf(), source })
}

/// Write a request and read back the reply, returning the OK payload
async fn round_trip(
    stream: &mut UnixStream,
    command: &'static str,
    message: &[u8],
) -> Result<Vec<u8>, TransportError> {
    stream.write_all(message).await?;

    let mut header_bytes = [0u8; HEADER_LEN];
    stream.read_exact(&mut header_bytes).await?;
    let header = IpcHeader::decode(&header_bytes)?;

    let mut payload = vec![0u8; header.payload_len()];
    stream.read_exact(&mut payload).await?;

    if header.is_ok() {
        Ok(payload)
    } else if header.is_error() {
        Err(TransportError::Rejected { command, code: decode_error_code(&payload)? })
    } else {
        Err(TransportError::UnexpectedResponse {
            command,
            command_set: header.command_set,
            command_id: header.command_id,
        })
    }
}
