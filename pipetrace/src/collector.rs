//! # Trace Collection
//!
//! Opens one session, drains its stream into a sink, and makes sure the
//! session is stopped at most once and the drain has finished before
//! [`TraceCollector::collect`] returns.
//!
//! ## Control Flow
//!
//! ```text
//!   collect(sink, stop)
//!      │
//!      ├─ open session ──────────────┐
//!      │                             │ stopper
//!      ▼ reader                      ▼
//!   drain loop                  stop reaction task
//!   read → write → ...          waits for stop signal
//!      │                        if !finished: stopper.stop()
//!      │ EOF / error                 │
//!      ▼                             │
//!   finished = true  ◀── checked ────┘
//!   abort reaction, release session
//! ```
//!
//! The stop reaction is its own task. `stop()` makes the runtime flush the
//! remaining data into the very stream the drain loop is reading, so running
//! the stop request inline with the reads could stall both sides. A stop
//! signal that is already fired when `collect` starts is handled the same
//! way: the reaction fires right away on its task while the drain keeps
//! reading.
//!
//! ## Finished Flag
//!
//! `finished` is set by a drop guard around the drain loop, so every exit
//! (end-of-data, sink failure, unwinding) marks it. A reaction that fires
//! afterwards sees the flag and skips `stop()`. The reaction task is also
//! aborted once draining is over.

use log::{debug, info, warn};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::config::SessionConfig;
use crate::domain::{CollectError, TransportError};
use crate::preflight::check_process_exists;
use crate::session::{IpcTransport, Session, SessionStopper, Transport};

/// Read size of the drain loop
pub const CHUNK_SIZE: usize = 64 * 1024;

/// When to request the end of a session
///
/// Holds a cancellation token and an optional deadline measured from the
/// start of collection. Whichever fires first requests the stop. Firing the
/// token more than once has no further effect.
#[derive(Debug, Clone, Default)]
pub struct StopCondition {
    token: CancellationToken,
    deadline: Option<Duration>,
}

impl StopCondition {
    /// Stop after `duration`
    #[must_use]
    pub fn after(duration: Duration) -> Self {
        Self { token: CancellationToken::new(), deadline: Some(duration) }
    }

    /// Stop when `token` is cancelled
    #[must_use]
    pub fn token(token: CancellationToken) -> Self {
        Self { token, deadline: None }
    }

    /// Also stop after `duration`
    #[must_use]
    pub fn with_deadline(self, duration: Duration) -> Self {
        Self { deadline: Some(duration), ..self }
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

impl From<Duration> for StopCondition {
    fn from(duration: Duration) -> Self {
        Self::after(duration)
    }
}

impl From<CancellationToken> for StopCondition {
    fn from(token: CancellationToken) -> Self {
        Self::token(token)
    }
}

/// Why a collection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// The deadline elapsed
    Deadline,
    /// The caller's token was cancelled
    Cancelled,
    /// The session ended on its own, e.g. the target exited
    EndOfStream,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopCause::Deadline => "duration limit reached",
            StopCause::Cancelled => "interrupted",
            StopCause::EndOfStream => "session ended",
        })
    }
}

/// Outcome of a successful collection
#[derive(Debug, Clone)]
pub struct CollectSummary {
    pub session_id: u64,
    pub bytes_written: u64,
    pub elapsed: Duration,
    pub cause: StopCause,
}

/// How the drain loop exited without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainEnd {
    EndOfStream,
    /// The stop request failed; the stream was dropped instead
    Abandoned,
}

/// Sets the finished flag when dropped
struct FinishedGuard<'a>(&'a AtomicBool);

impl Drop for FinishedGuard<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Captures a runtime trace from one process into a byte sink
///
/// ```rust,ignore
/// let collector = TraceCollector::new(SessionConfig::default().with_pid(Some(Pid(1234))));
/// let summary = collector.collect_to_path("trace.nettrace", Duration::from_secs(5)).await?;
/// ```
pub struct TraceCollector<T = IpcTransport> {
    config: SessionConfig,
    transport: T,
}

impl TraceCollector<IpcTransport> {
    /// Collector using the diagnostics socket transport
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self::with_transport(config, IpcTransport::new())
    }
}

impl<T: Transport> TraceCollector<T> {
    #[must_use]
    pub fn with_transport(config: SessionConfig, transport: T) -> Self {
        Self { config, transport }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Collect into a file at `path`, creating or truncating it
    ///
    /// # Errors
    /// Returns [`CollectError::Output`] if the file cannot be created, plus
    /// everything [`collect`](Self::collect) returns
    pub async fn collect_to_path(
        &self,
        path: impl AsRef<Path>,
        stop: impl Into<StopCondition>,
    ) -> Result<CollectSummary, CollectError> {
        let path = path.as_ref();
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|source| CollectError::Output { path: path.to_path_buf(), source })?;
        let mut writer = BufWriter::new(file);
        self.collect(&mut writer, stop).await
    }

    /// Collect into `sink` until the session ends or `stop` fires
    ///
    /// Returns once the stream is fully drained and flushed. Bytes are
    /// written exactly as read from the session, in order.
    ///
    /// # Errors
    /// - [`CollectError::Resolution`] if the target process does not exist
    /// - [`CollectError::SessionOpen`] if the runtime refuses the session
    /// - [`CollectError::SinkWrite`] if `sink` rejects a write
    /// - [`CollectError::StreamRead`] if the stream fails before any stop was requested
    /// - [`CollectError::Stop`] if the stop request failed and the stream had to be dropped
    pub async fn collect<W>(
        &self,
        sink: &mut W,
        stop: impl Into<StopCondition>,
    ) -> Result<CollectSummary, CollectError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let stop = stop.into();
        let started = Instant::now();

        // Child token: the deadline must not cancel the caller's token.
        let token = stop.token.child_token();
        let deadline_hit = Arc::new(AtomicBool::new(false));
        let _deadline_timer = stop.deadline.map(|deadline| {
            let token = token.clone();
            let deadline_hit = Arc::clone(&deadline_hit);
            AbortOnDropHandle::new(tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                deadline_hit.store(true, Ordering::Release);
                token.cancel();
            }))
        });

        let pid = self.config.target_pid();
        check_process_exists(pid)?;

        let Session { id: session_id, mut reader, stopper } = self
            .transport
            .open(pid, &self.config)
            .await
            .map_err(|source| CollectError::SessionOpen { pid, source })?;
        debug!("Draining session {session_id} from {pid}");

        let finished = Arc::new(AtomicBool::new(false));
        let abandon = CancellationToken::new();
        let mut reaction = AbortOnDropHandle::new(tokio::spawn(stop_reaction(
            stopper,
            token.clone(),
            Arc::clone(&finished),
            abandon.clone(),
        )));

        let drained = {
            let _finished = FinishedGuard(&finished);
            drain(&mut reader, sink, &token, &abandon).await
        };
        let cause = if deadline_hit.load(Ordering::Acquire) {
            StopCause::Deadline
        } else if token.is_cancelled() {
            StopCause::Cancelled
        } else {
            StopCause::EndOfStream
        };

        reaction.abort();
        let stop_result = (&mut reaction).await.unwrap_or(None);
        drop(reader);

        let (bytes_written, end) = drained?;
        match (end, stop_result) {
            (DrainEnd::Abandoned, Some(Err(source))) => {
                return Err(CollectError::Stop { session_id, source });
            }
            (_, Some(Err(e))) => {
                debug!("Stop request for session {session_id} failed after the stream ended: {e}");
            }
            _ => {}
        }

        let summary =
            CollectSummary { session_id, bytes_written, elapsed: started.elapsed(), cause };
        info!(
            "Session {session_id} finished ({cause}): {bytes_written} bytes in {:.1}s",
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }
}

/// Wait for the stop signal, then stop the session unless draining is done
///
/// Returns `None` when no stop request was sent. A failed request while the
/// drain is still running cancels `abandon` so the drain loop lets go of
/// the stream instead of waiting for an end that may never come.
async fn stop_reaction<S: SessionStopper>(
    stopper: S,
    stop: CancellationToken,
    finished: Arc<AtomicBool>,
    abandon: CancellationToken,
) -> Option<Result<(), TransportError>> {
    stop.cancelled().await;
    if finished.load(Ordering::Acquire) {
        debug!("Stop requested after the stream ended, nothing to do");
        return None;
    }

    info!("Stopping session");
    let result = stopper.stop().await;
    if let Err(ref e) = result {
        if !finished.load(Ordering::Acquire) {
            warn!("Stop request failed: {e}; closing the session stream");
            abandon.cancel();
        }
    }
    Some(result)
}

/// Copy `reader` into `sink` chunk by chunk until end-of-data
///
/// A read error after the stop signal fired is the stream being torn down
/// and counts as end-of-data.
async fn drain<R, W>(
    reader: &mut R,
    sink: &mut W,
    stop: &CancellationToken,
    abandon: &CancellationToken,
) -> Result<(u64, DrainEnd), CollectError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    let end = loop {
        let read = tokio::select! {
            biased;
            () = abandon.cancelled() => break DrainEnd::Abandoned,
            read = reader.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => break DrainEnd::EndOfStream,
            Ok(n) => n,
            Err(e) if stop.is_cancelled() => {
                debug!("Session stream closed after stop: {e}");
                break DrainEnd::EndOfStream;
            }
            Err(e) => return Err(CollectError::StreamRead(e)),
        };
        sink.write_all(&buf[..n]).await.map_err(CollectError::SinkWrite)?;
        total += n as u64;
    };

    sink.flush().await.map_err(CollectError::SinkWrite)?;
    Ok((total, end))
}
