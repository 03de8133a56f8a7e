//! The per-call state machine.
//!
//! A [`CallContext`] drives one RPC from connection to completion. It writes
//! the initiation frames, owns the read loop that dispatches server frames,
//! and exposes headers, trailers and status once they are known.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use futures::StreamExt;
use piperpc_core::{Frame, FrameCodec, Metadata, Status};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cancel::{CancelSource, classify};
use super::deadline::Deadline;
use super::once::ResolveOnce;
use super::queue::PayloadQueue;
use crate::ClientError;
use crate::config::CallOptions;
use crate::transport::{self, Connector, FrameReader, FrameWriter};

#[cfg(feature = "tracing")]
use tracing::Instrument;

/// Lifecycle of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Created, not connected yet.
    Created,
    /// Initiation frames written, nothing received.
    Connected,
    /// At least one frame received from the server.
    Active,
    /// Trailers received; status is available.
    Completed,
    /// Dropped or abandoned before completion.
    Abandoned,
}

/// State shared between the caller, the read loop and the cancel task.
#[derive(Debug)]
struct Shared {
    headers: ResolveOnce<Metadata>,
    trailers: Mutex<Option<(Metadata, Status)>>,
    queue: Arc<PayloadQueue>,
    pending: Mutex<Option<Bytes>>,
    state: Mutex<CallState>,
    writer: OnceLock<Arc<FrameWriter>>,
    cancel_sent: tokio::sync::Mutex<bool>,
    token: CancellationToken,
    deadline: Arc<Deadline>,
    server_unary: bool,
}

impl Shared {
    fn state(&self) -> CallState {
        *lock(&self.state)
    }

    fn transition(&self, from: &[CallState], to: CallState) {
        let mut state = lock(&self.state);
        if from.contains(&state) {
            *state = to;
        }
    }

    fn is_finished(&self) -> bool {
        matches!(self.state(), CallState::Completed | CallState::Abandoned) || self.queue.is_terminal()
    }

    fn handle_headers(&self, metadata: Metadata) {
        self.headers.resolve(metadata);
    }

    fn handle_payload(&self, payload: Bytes) -> Result<(), ClientError> {
        self.headers.resolve(Metadata::new());
        if !self.server_unary {
            self.queue.append(payload);
            return Ok(());
        }

        let mut pending = lock(&self.pending);
        if pending.is_some() {
            return Err(ClientError::Protocol(
                "more than one payload for a unary response".into(),
            ));
        }
        *pending = Some(payload);
        Ok(())
    }

    async fn handle_trailers(&self, metadata: Metadata, status: Status) {
        self.headers.resolve(Metadata::new());
        {
            let mut trailers = lock(&self.trailers);
            if trailers.is_some() {
                return;
            }
            *trailers = Some((metadata, status.clone()));
        }
        self.transition(
            &[CallState::Connected, CallState::Active],
            CallState::Completed,
        );

        if let Some(payload) = lock(&self.pending).take() {
            self.queue.append(payload);
        }
        if status.is_ok() {
            self.queue.set_completed();
        } else {
            self.queue.set_error(ClientError::from(status));
        }

        if let Some(writer) = self.writer.get() {
            writer.close().await;
        }
    }

    /// Terminate the call locally because no trailers will arrive.
    ///
    /// Once the call was cancelled or its deadline fired, that is the
    /// outcome reported, whatever broke the connection afterwards.
    async fn fail(&self, err: ClientError) {
        let err = if self.token.is_cancelled() || self.deadline.is_expired() {
            classify(CancelSource::Call, &self.deadline)
        } else {
            err
        };

        #[cfg(feature = "tracing")]
        tracing::warn!(error = %err, "call ended without trailers");

        self.headers.resolve(Metadata::new());
        // a held unary payload belongs to a call that never completed
        lock(&self.pending).take();
        self.queue.set_error(err);
        if let Some(writer) = self.writer.get() {
            writer.close().await;
        }
    }

    /// Write a `Cancel` frame unless the call is complete or one was sent.
    ///
    /// The frame only counts as sent once the write finished, so an attempt
    /// dropped halfway leaves the next one free to send it.
    async fn send_cancel(&self) -> Result<bool, ClientError> {
        if self.state() == CallState::Completed {
            return Ok(false);
        }
        let Some(writer) = self.writer.get() else {
            return Ok(false);
        };
        let mut sent = self.cancel_sent.lock().await;
        if *sent {
            return Ok(false);
        }
        writer.batch().cancel().commit().await?;
        *sent = true;
        Ok(true)
    }

    async fn abandon(&self) {
        if self.state() == CallState::Completed {
            return;
        }
        self.transition(
            &[CallState::Created, CallState::Connected, CallState::Active],
            CallState::Abandoned,
        );
        self.headers.resolve(Metadata::new());
        self.queue.set_error(ClientError::Cancelled);

        if let Err(_err) = self.send_cancel().await {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %_err, "cancel frame not delivered while abandoning call");
        }
        if let Some(writer) = self.writer.get() {
            writer.close().await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One RPC invocation.
///
/// The context is created per call, started once with
/// [`start`](Self::start), and read through the payload queue it owns. Dropping
/// an unfinished context abandons the call: a best-effort `Cancel` frame is
/// sent and the connection is released.
///
/// Deadline expiry never sends `Cancel`; it only aborts local waits. Only the
/// call's cancellation token and abandonment notify the server.
pub struct CallContext {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    metadata: Metadata,
    token: CancellationToken,
    deadline: Arc<Deadline>,
    codec: FrameCodec,
    started: AtomicBool,
    request_closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CallContext {
    /// Create a call that connects through `connector`.
    ///
    /// `server_unary` marks calls expecting exactly one response message,
    /// which is delivered only after the trailers arrive.
    pub fn new(connector: Arc<dyn Connector>, options: CallOptions, server_unary: bool) -> Self {
        let deadline = Arc::new(Deadline::new(options.effective_deadline(None)));
        let token = options.cancellation_token.unwrap_or_default();
        Self {
            shared: Arc::new(Shared {
                headers: ResolveOnce::new(),
                trailers: Mutex::new(None),
                queue: Arc::new(PayloadQueue::new()),
                pending: Mutex::new(None),
                state: Mutex::new(CallState::Created),
                writer: OnceLock::new(),
                cancel_sent: tokio::sync::Mutex::new(false),
                token: token.clone(),
                deadline: deadline.clone(),
                server_unary,
            }),
            connector,
            metadata: options.metadata,
            token,
            deadline,
            codec: FrameCodec::default(),
            started: AtomicBool::new(false),
            request_closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Use `codec` for framing, e.g. to change the maximum frame size.
    pub fn with_frame_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Connect and send the initiation frames.
    ///
    /// `RequestInit`, `Headers` and the optional request payload are written
    /// as one unit. If the call token is already cancelled or the deadline
    /// already passed this is a no-op and nothing is connected; reads then
    /// fail with the matching error.
    ///
    /// # Errors
    ///
    /// Connection and write failures terminate the call and are returned as
    /// [`ClientError::Transport`]. Starting twice is
    /// [`ClientError::InvalidState`].
    pub async fn start(&self, method: &str, request: Option<Bytes>) -> Result<(), ClientError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ClientError::invalid_state("call already started"));
        }
        self.deadline.arm();
        if self.token.is_cancelled() || self.deadline.is_expired() {
            #[cfg(feature = "tracing")]
            tracing::debug!(method, "call cancelled before start; not connecting");
            return Ok(());
        }

        let stream = self
            .guarded(async {
                self.connector
                    .connect()
                    .await
                    .map_err(|e| ClientError::Transport(format!("connect failed: {e}")))
            })
            .await
            .map_err(|e| self.fail_start(e))?;

        let (frames, writer) = transport::into_frames(stream, self.codec.clone());
        let mut batch = writer
            .batch()
            .request_init(method, self.deadline.at())
            .headers(self.metadata.clone());
        if let Some(request) = request {
            batch = batch.payload(request);
        }
        self.guarded(batch.commit())
            .await
            .map_err(|e| self.fail_start(e))?;

        let _ = self.shared.writer.set(Arc::new(writer));
        self.shared
            .transition(&[CallState::Created], CallState::Connected);

        #[cfg(feature = "tracing")]
        tracing::debug!(method, "call initiated");

        let read_loop = read_loop(self.shared.clone(), frames);
        #[cfg(feature = "tracing")]
        let read_loop = read_loop.instrument(tracing::Span::current());
        let read_loop = tokio::spawn(read_loop);

        // registered only after the initiation frames are on the wire
        let cancel = tokio::spawn(watch_cancel(self.shared.clone(), self.token.clone()));

        lock(&self.tasks).extend([read_loop, cancel]);
        Ok(())
    }

    /// Send one request message on a client-streaming or bidi call.
    pub async fn send_message(&self, payload: Bytes) -> Result<(), ClientError> {
        let writer = self.request_writer()?;
        self.guarded(writer.batch().payload(payload).commit()).await
    }

    /// Signal that no more request messages follow.
    pub async fn complete_request(&self) -> Result<(), ClientError> {
        let writer = self.request_writer()?;
        if self.request_closed.swap(true, Ordering::AcqRel) {
            return Err(ClientError::invalid_state("request stream already completed"));
        }
        self.guarded(writer.batch().stream_end().commit()).await
    }

    /// Wait for the response headers.
    ///
    /// Headers always resolve before the call completes; if the server
    /// never sent any they are empty. Fails if the call is cancelled or the
    /// deadline fires first.
    pub async fn response_headers(&self) -> Result<Metadata, ClientError> {
        if let Some(headers) = self.shared.headers.get() {
            return Ok(headers);
        }
        tokio::select! {
            biased;
            headers = self.shared.headers.wait() => Ok(headers),
            _ = self.deadline.cancelled() => Err(ClientError::DeadlineExceeded),
            _ = self.token.cancelled() => Err(classify(CancelSource::Call, &self.deadline)),
        }
    }

    /// The response trailers.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidState`] until the trailers have been received.
    pub fn trailers(&self) -> Result<Metadata, ClientError> {
        lock(&self.shared.trailers)
            .as_ref()
            .map(|(metadata, _)| metadata.clone())
            .ok_or_else(|| ClientError::invalid_state("trailers not received yet"))
    }

    /// The final status sent by the server.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidState`] until the trailers have been received.
    pub fn status(&self) -> Result<Status, ClientError> {
        lock(&self.shared.trailers)
            .as_ref()
            .map(|(_, status)| status.clone())
            .ok_or_else(|| ClientError::invalid_state("status not received yet"))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CallState {
        self.shared.state()
    }

    /// Best-effort cancellation of an unfinished call.
    ///
    /// Sends `Cancel` if the call is connected and not complete, then closes
    /// the connection. Write failures are ignored since the peer may already
    /// be gone. Pending reads fail with [`ClientError::Cancelled`].
    pub async fn abandon(&self) {
        self.shared.abandon().await;
    }

    /// The call's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The call's deadline.
    pub fn deadline(&self) -> &Arc<Deadline> {
        &self.deadline
    }

    pub(crate) fn queue(&self) -> &Arc<PayloadQueue> {
        &self.shared.queue
    }

    fn request_writer(&self) -> Result<Arc<FrameWriter>, ClientError> {
        if self.deadline.is_expired() {
            return Err(ClientError::DeadlineExceeded);
        }
        if self.token.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        if self.request_closed.load(Ordering::Acquire) {
            return Err(ClientError::invalid_state("request stream already completed"));
        }
        self.shared
            .writer
            .get()
            .cloned()
            .ok_or_else(|| ClientError::invalid_state("call not started"))
    }

    /// Run `fut` unless the deadline or the call token fires first.
    async fn guarded<F, T>(&self, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        tokio::select! {
            biased;
            _ = self.deadline.cancelled() => Err(ClientError::DeadlineExceeded),
            _ = self.token.cancelled() => Err(classify(CancelSource::Call, &self.deadline)),
            result = fut => result,
        }
    }

    fn fail_start(&self, err: ClientError) -> ClientError {
        #[cfg(feature = "tracing")]
        tracing::debug!(error = %err, "call failed to start");

        self.shared.headers.resolve(Metadata::new());
        self.shared.queue.set_error(err.clone());
        err
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("state", &self.state())
            .field("deadline", &self.deadline.at())
            .field("server_unary", &self.shared.server_unary)
            .finish_non_exhaustive()
    }
}

impl Drop for CallContext {
    fn drop(&mut self) {
        let tasks = std::mem::take(self.tasks.get_mut().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }

        if self.shared.writer.get().is_none() || self.shared.is_finished() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = self.shared.clone();
            handle.spawn(async move { shared.abandon().await });
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut frames: FrameReader) {
    let err = loop {
        let frame = match frames.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break ClientError::from(e),
            None => break ClientError::Transport("connection closed before trailers".into()),
        };

        let name = frame.name();
        #[cfg(feature = "tracing")]
        tracing::trace!(frame = name, "frame received");

        shared.transition(&[CallState::Connected], CallState::Active);
        match frame {
            Frame::Headers(metadata) => shared.handle_headers(metadata),
            Frame::Payload(payload) => {
                if let Err(e) = shared.handle_payload(payload) {
                    break e;
                }
            }
            Frame::Trailers { metadata, status } => {
                shared.handle_trailers(metadata, status).await;
                return;
            }
            Frame::RequestInit { .. } | Frame::Cancel | Frame::StreamEnd => {
                break ClientError::Protocol(format!("unexpected {name} frame from server"));
            }
        }
    };
    shared.fail(err).await;
}

async fn watch_cancel(shared: Arc<Shared>, token: CancellationToken) {
    token.cancelled().await;
    match shared.send_cancel().await {
        Ok(_sent) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(sent = _sent, "call cancelled by caller");
        }
        Err(_err) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %_err, "cancel frame not delivered");
        }
    }
}
