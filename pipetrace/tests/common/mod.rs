//! Test doubles for the session transport.
//!
//! - [`ScriptedTransport`]: in-memory runtime behind a `tokio::io::duplex`
//! - [`FakeRuntime`]: diagnostics server on a real Unix socket

#![allow(dead_code)]

use pipetrace::config::SessionConfig;
use pipetrace::domain::{Pid, TransportError};
use pipetrace::session::{Session, SessionStopper, Transport};
use pipetrace_common::{
    decode_session_id, encode_error, encode_ok_session, event_pipe, hresult, IpcHeader, HEADER_LEN,
    NETTRACE_MAGIC,
};
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub const SCRIPTED_SESSION_ID: u64 = 7;
pub const FAKE_SESSION_ID: u64 = 0x5E55_1011;

// ============================================================================
// Scripted in-memory transport
// ============================================================================

/// How the scripted runtime ends its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// Wait for stop, write the trailer, close
    AfterStop,
    /// Close right after the chunks, without waiting for stop
    OnItsOwn,
    /// Wait for stop, then fail the next read
    ResetAfterStop,
    /// Fail the read right after the chunks
    ResetOnItsOwn,
}

pub struct ScriptedTransport {
    chunks: Vec<Vec<u8>>,
    trailer: Vec<u8>,
    ending: Ending,
    fail_open: bool,
    fail_stop: bool,
    stops: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            trailer: b"--rundown-and-trailer--".to_vec(),
            ending: Ending::AfterStop,
            fail_open: false,
            fail_stop: false,
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn ending(mut self, ending: Ending) -> Self {
        self.ending = ending;
        self
    }

    pub fn trailer(mut self, trailer: &[u8]) -> Self {
        self.trailer = trailer.to_vec();
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Shared counter of stop calls, readable after the transport is moved
    pub fn stop_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.stops)
    }

    /// Bytes the collector should write for a clean run
    pub fn expected_output(&self) -> Vec<u8> {
        let mut out: Vec<u8> = self.chunks.concat();
        if self.ending == Ending::AfterStop {
            out.extend_from_slice(&self.trailer);
        }
        out
    }
}

impl Transport for ScriptedTransport {
    type Reader = ScriptedReader;
    type Stopper = ScriptedStopper;

    async fn open(
        &self,
        _pid: Pid,
        _config: &SessionConfig,
    ) -> Result<Session<ScriptedReader, ScriptedStopper>, TransportError> {
        if self.fail_open {
            return Err(TransportError::Rejected {
                command: "CollectTracing2",
                code: hresult::NOT_SUPPORTED,
            });
        }

        let (client, mut runtime) = tokio::io::duplex(1024);
        let stopped = Arc::new(Notify::new());

        let chunks = self.chunks.clone();
        let trailer = self.trailer.clone();
        let ending = self.ending;
        let runtime_stopped = Arc::clone(&stopped);
        tokio::spawn(async move {
            for chunk in chunks {
                if runtime.write_all(&chunk).await.is_err() {
                    return;
                }
            }
            match ending {
                Ending::AfterStop => {
                    runtime_stopped.notified().await;
                    let _ = runtime.write_all(&trailer).await;
                }
                Ending::ResetAfterStop => runtime_stopped.notified().await,
                Ending::OnItsOwn | Ending::ResetOnItsOwn => {}
            }
        });

        let reset_at_eof = matches!(ending, Ending::ResetAfterStop | Ending::ResetOnItsOwn);
        Ok(Session {
            id: SCRIPTED_SESSION_ID,
            reader: ScriptedReader { inner: client, reset_at_eof },
            stopper: ScriptedStopper {
                stopped,
                stops: Arc::clone(&self.stops),
                fail: self.fail_stop,
            },
        })
    }
}

/// Duplex reader that can turn end-of-data into a connection reset
pub struct ScriptedReader {
    inner: DuplexStream,
    reset_at_eof: bool,
}

impl AsyncRead for ScriptedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before && this.reset_at_eof => {
                Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)))
            }
            other => other,
        }
    }
}

pub struct ScriptedStopper {
    stopped: Arc<Notify>,
    stops: Arc<AtomicUsize>,
    fail: bool,
}

impl SessionStopper for ScriptedStopper {
    async fn stop(&self) -> Result<(), TransportError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        self.stopped.notify_one();
        Ok(())
    }
}

/// Sink that accepts `limit` bytes, then fails every write
pub struct FailingSink {
    pub written: usize,
    limit: usize,
}

impl FailingSink {
    pub fn new(limit: usize) -> Self {
        Self { written: 0, limit }
    }
}

impl AsyncWrite for FailingSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.written >= self.limit {
            return Poll::Ready(Err(io::Error::other("disk full")));
        }
        let n = buf.len().min(self.limit - self.written);
        self.written += n;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Chunks with distinct contents and awkward sizes
pub fn patterned_chunks() -> Vec<Vec<u8>> {
    [1usize, 7, 1023, 1024, 1025, 70_000, 3]
        .iter()
        .enumerate()
        .map(|(i, &len)| (0..len).map(|j| ((i * 31 + j) % 251) as u8).collect())
        .collect()
}

// ============================================================================
// Fake diagnostics server
// ============================================================================

/// How the fake runtime answers collect requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Normal,
    /// Answers `CollectTracing2` with "unknown command"
    LegacyOnly,
    /// Answers every collect request with this HRESULT
    Reject(u32),
}

pub const EVENT_BLOCK: &[u8] = b"<event-block>";
pub const END_OF_STREAM: &[u8] = b"<end-of-stream>";

/// The stream preamble a runtime writes first
pub fn nettrace_preamble() -> Vec<u8> {
    let mut out = NETTRACE_MAGIC.to_vec();
    let tag = b"!FastSerialization.1";
    out.extend_from_slice(&(tag.len() as u32).to_le_bytes());
    out.extend_from_slice(tag);
    out
}

/// A received request: command id and payload
pub type Request = (u8, Vec<u8>);

/// Diagnostics server publishing an endpoint for one pid in a temp directory
pub struct FakeRuntime {
    dir: TempDir,
    requests: Arc<Mutex<Vec<Request>>>,
    server: JoinHandle<()>,
}

impl FakeRuntime {
    pub fn start(pid: Pid, behavior: Behavior) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("dotnet-diagnostic-{}-424242-socket", pid.0));
        let listener = UnixListener::bind(&path).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(Notify::new());

        let server_requests = Arc::clone(&requests);
        let server = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(
                    stream,
                    behavior,
                    Arc::clone(&stop),
                    Arc::clone(&server_requests),
                ));
            }
        });

        Self { dir, requests, server }
    }

    pub fn socket_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn command_ids(&self) -> Vec<u8> {
        self.requests().into_iter().map(|(id, _)| id).collect()
    }
}

impl Drop for FakeRuntime {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    behavior: Behavior,
    stop: Arc<Notify>,
    requests: Arc<Mutex<Vec<Request>>>,
) {
    let mut header = [0u8; HEADER_LEN];
    if stream.read_exact(&mut header).await.is_err() {
        return;
    }
    let header = IpcHeader::decode(&header).unwrap();
    let mut payload = vec![0u8; header.payload_len()];
    stream.read_exact(&mut payload).await.unwrap();
    requests.lock().unwrap().push((header.command_id, payload.clone()));

    match (header.command_id, behavior) {
        (event_pipe::STOP_TRACING, _) => {
            let session_id = decode_session_id(&payload).unwrap();
            let _ = stream.write_all(&encode_ok_session(session_id)).await;
            stop.notify_one();
        }
        (_, Behavior::Reject(code)) => {
            let _ = stream.write_all(&encode_error(code)).await;
        }
        (event_pipe::COLLECT_TRACING_2, Behavior::LegacyOnly) => {
            let _ = stream.write_all(&encode_error(hresult::UNKNOWN_COMMAND)).await;
        }
        (event_pipe::COLLECT_TRACING | event_pipe::COLLECT_TRACING_2, _) => {
            if stream.write_all(&encode_ok_session(FAKE_SESSION_ID)).await.is_err()
                || stream.write_all(&nettrace_preamble()).await.is_err()
            {
                return;
            }
            loop {
                tokio::select! {
                    () = stop.notified() => break,
                    () = tokio::time::sleep(Duration::from_millis(5)) => {
                        if stream.write_all(EVENT_BLOCK).await.is_err() {
                            return;
                        }
                    }
                }
            }
            let _ = stream.write_all(END_OF_STREAM).await;
        }
        _ => {
            let _ = stream.write_all(&encode_error(hresult::UNKNOWN_COMMAND)).await;
        }
    }
}
