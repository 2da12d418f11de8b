//! Per-connection protocol loop.
//!
//! A session reads frames strictly one after another: each request is
//! dispatched and answered (including every retry) before the next frame is
//! read. A heartbeat task runs next to the loop and shares the write path,
//! which is serialized by [`FrameWriter`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use patrpc_proto::messages::Envelope;
use patrpc_proto::{CodecError, Frame, FrameCodec, Response};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{ConnectionHandle, ServerContext};
use crate::dispatcher::Dispatcher;
use crate::error::{ServerError, ServerResult};
use crate::metrics::MetricsCollector;

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer closed the connection between frames.
    PeerClosed,
    /// The server is shutting down.
    Shutdown,
    /// The connection was closed from the server side.
    Closed,
    /// No frame arrived within the heartbeat timeout.
    HeartbeatTimeout,
    /// The peer violated the framing rules.
    Protocol(CodecError),
    /// Reading from the connection failed.
    Transport(CodecError),
    /// A reply could not be written.
    WriteFailed(String),
}

impl CloseReason {
    /// Whether the session ended because of an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Transport(_) | Self::WriteFailed(_)
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::Shutdown => f.write_str("server shutdown"),
            Self::Closed => f.write_str("closed by server"),
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Transport(e) => write!(f, "read error: {e}"),
            Self::WriteFailed(e) => write!(f, "write error: {e}"),
        }
    }
}

/// Serialized, timeout-bounded write half of a connection.
///
/// Every write is abandoned as soon as the abort token fires, including
/// writes still waiting for the lock.
pub struct FrameWriter<W> {
    sink: Arc<Mutex<FramedWrite<W, FrameCodec>>>,
    timeout: Duration,
    abort: CancellationToken,
}

impl<W> Clone for FrameWriter<W> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            timeout: self.timeout,
            abort: self.abort.clone(),
        }
    }
}

impl<W> fmt::Debug for FrameWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameWriter")
            .field("timeout", &self.timeout)
            .field("aborted", &self.abort.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writer. Every write must finish within `timeout`.
    #[must_use]
    pub fn new(writer: W, timeout: Duration) -> Self {
        Self {
            sink: Arc::new(Mutex::new(FramedWrite::new(writer, FrameCodec::new()))),
            timeout,
            abort: CancellationToken::new(),
        }
    }

    /// Abandon pending and future writes once `abort` is cancelled.
    #[must_use]
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    /// Whether writes are being abandoned.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Encode and flush one response.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ConnectionClosed` if the writer is aborted first,
    /// `ServerError::WriteTimeout` if the write does not finish in time, or
    /// the codec error that aborted it.
    pub async fn send(&self, response: Response) -> ServerResult<()> {
        self.bounded(async {
            let mut sink = self.sink.lock().await;
            tokio::time::timeout(self.timeout, sink.send(response)).await
        })
        .await
    }

    /// Flush and shut down the write half.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails, times out or is aborted.
    pub async fn close(&self) -> ServerResult<()> {
        self.bounded(async {
            let mut sink = self.sink.lock().await;
            tokio::time::timeout(self.timeout, SinkExt::<Response>::close(&mut *sink)).await
        })
        .await
    }

    async fn bounded<F>(&self, write: F) -> ServerResult<()>
    where
        F: Future<Output = Result<Result<(), CodecError>, tokio::time::error::Elapsed>>,
    {
        tokio::select! {
            biased;
            () = self.abort.cancelled() => Err(ServerError::ConnectionClosed),
            written = write => written
                .map_err(|_| ServerError::WriteTimeout(self.timeout))
                .and_then(|result| result.map_err(ServerError::from)),
        }
    }
}

/// One accepted connection's protocol state machine.
#[derive(Debug)]
pub struct Session {
    ctx: Arc<ServerContext>,
    handle: ConnectionHandle,
    dispatcher: Dispatcher,
}

impl Session {
    /// Create a session for a connection already registered in `ctx`.
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>, handle: ConnectionHandle) -> Self {
        let dispatcher = ctx.dispatcher();
        Self {
            ctx,
            handle,
            dispatcher,
        }
    }

    /// The connection this session serves.
    #[must_use]
    pub const fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Run the session until the connection ends, then tear it down.
    ///
    /// Teardown stops and joins the heartbeat task, deregisters the
    /// connection and closes the write half.
    pub async fn run<R, W>(self, reader: R, writer: W) -> CloseReason
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let config = self.ctx.config();
        let writer =
            FrameWriter::new(writer, config.timeout).with_abort(self.handle.close_token());
        let mut frames = FramedRead::new(
            reader,
            FrameCodec::new().with_max_frame_len(config.max_frame_len),
        );

        let heartbeat_stop = CancellationToken::new();
        let heartbeat = self.ctx.tasks().spawn(run_heartbeat(
            writer.clone(),
            self.ctx.metrics().clone(),
            config.heartbeat_interval,
            heartbeat_stop.clone(),
            self.handle.id(),
        ));

        let reason = self.serve(&mut frames, &writer).await;

        heartbeat_stop.cancel();
        if let Err(e) = heartbeat.await {
            self.ctx.metrics().record_heartbeat_failure();
            warn!(connection_id = self.handle.id(), error = %e, "Heartbeat task aborted");
        }

        if matches!(reason, CloseReason::HeartbeatTimeout) {
            self.ctx.metrics().record_heartbeat_failure();
            warn!(
                connection_id = self.handle.id(),
                peer = %self.handle.peer(),
                timeout_ms = config.heartbeat_timeout.as_millis(),
                "Heartbeat timeout, closing connection"
            );
        }

        self.ctx.connections().deregister(self.handle.id());
        match writer.close().await {
            Ok(()) | Err(ServerError::ConnectionClosed) => {}
            Err(e) => {
                debug!(connection_id = self.handle.id(), error = %e, "Connection close failed");
            }
        }

        info!(
            connection_id = self.handle.id(),
            peer = %self.handle.peer(),
            reason = %reason,
            lifetime_ms = self.handle.opened_at().elapsed().as_millis(),
            "Connection closed"
        );
        reason
    }

    async fn serve<R, W>(
        &self,
        frames: &mut FramedRead<R, FrameCodec>,
        writer: &FrameWriter<W>,
    ) -> CloseReason
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let metrics = self.ctx.metrics();
        let heartbeat_timeout = self.ctx.config().heartbeat_timeout;

        loop {
            let next = tokio::select! {
                biased;
                () = self.ctx.shutdown_token().cancelled() => return CloseReason::Shutdown,
                () = self.handle.closed() => return CloseReason::Closed,
                next = tokio::time::timeout(heartbeat_timeout, frames.next()) => next,
            };

            let frame = match next {
                Err(_) => return CloseReason::HeartbeatTimeout,
                Ok(None) => return CloseReason::PeerClosed,
                Ok(Some(Err(e))) => {
                    metrics.record_error();
                    if e.is_protocol_violation() {
                        // Best effort; the connection is closed either way.
                        if let Err(write_err) =
                            writer.send(Response::error(None, e.to_string())).await
                        {
                            debug!(
                                connection_id = self.handle.id(),
                                error = %write_err,
                                "Protocol error reply not sent"
                            );
                        }
                        return CloseReason::Protocol(e);
                    }
                    return CloseReason::Transport(e);
                }
                Ok(Some(Ok(frame))) => frame,
            };

            if self.ctx.is_shutting_down() {
                return CloseReason::Shutdown;
            }

            let response = self.handle_frame(frame).await;
            match writer.send(response).await {
                Ok(()) => {}
                Err(ServerError::ConnectionClosed) => return self.stop_reason(),
                Err(e) => {
                    metrics.record_error();
                    return CloseReason::WriteFailed(e.to_string());
                }
            }
        }
    }

    fn stop_reason(&self) -> CloseReason {
        if self.ctx.is_shutting_down() {
            CloseReason::Shutdown
        } else {
            CloseReason::Closed
        }
    }

    async fn handle_frame(&self, frame: Frame) -> Response {
        match frame {
            Frame::InvalidLength(prefix) => {
                self.ctx.metrics().record_error();
                debug!(connection_id = self.handle.id(), prefix = %prefix, "Invalid length prefix");
                Response::error(None, format!("invalid length prefix: {prefix}"))
            }
            Frame::Body(body) => self.handle_body(&body).await,
        }
    }

    async fn handle_body(&self, body: &[u8]) -> Response {
        let metrics = self.ctx.metrics();

        let envelope = match Envelope::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics.record_error();
                debug!(connection_id = self.handle.id(), error = %e, "Undecodable request");
                return Response::error(None, e.to_string());
            }
        };
        let id = envelope.id.clone();
        let request = match envelope.into_request() {
            Ok(request) => request,
            Err(e) => {
                metrics.record_error();
                debug!(connection_id = self.handle.id(), error = %e, "Unresolvable pattern");
                return Response::error(id, e.to_string());
            }
        };

        if request.pattern.is_ping() {
            metrics.record_heartbeat();
            return Response::pong(request.id);
        }
        if request.pattern.is_empty() {
            metrics.record_error();
            return Response::error(request.id, "empty pattern command");
        }

        metrics.record_request();
        info!(
            connection_id = self.handle.id(),
            peer = %self.handle.peer(),
            pattern = request.cmd(),
            id = ?request.id,
            "Received request"
        );

        match self.dispatcher.dispatch(request.cmd(), &request.data).await {
            Ok(result) => Response::success(request.id, result),
            Err(e) => {
                metrics.record_error();
                debug!(pattern = request.cmd(), error = %e, "Request failed");
                Response::error(request.id, e.to_string())
            }
        }
    }
}

/// Send a heartbeat frame every `interval` until `stop` fires.
///
/// Failures are counted and logged; they never end the session.
async fn run_heartbeat<W>(
    writer: FrameWriter<W>,
    metrics: Arc<MetricsCollector>,
    interval: Duration,
    stop: CancellationToken,
    connection_id: u64,
) where
    W: AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                let sent = tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    sent = writer.send(Response::heartbeat()) => sent,
                };
                match sent {
                    Ok(()) => debug!(connection_id, "Heartbeat sent"),
                    Err(ServerError::ConnectionClosed) => break,
                    Err(e) => {
                        metrics.record_heartbeat_failure();
                        warn!(connection_id, error = %e, "Heartbeat send failed");
                    }
                }
            }
        }
    }
}
