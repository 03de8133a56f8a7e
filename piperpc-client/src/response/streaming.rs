//! Streaming response wrapper.
//!
//! This module provides [`Streaming`], the typed message stream of a
//! server-streaming or bidi call, with access to headers, trailers and the
//! final status.
//!
//! # Cancellation
//!
//! Dropping a [`Streaming`] before the server finished abandons the call: a
//! `Cancel` frame is sent and the connection is closed. For cooperative
//! cancellation pass a token with [`CallOptions::cancellation_token`], or
//! bound a single read with [`Streaming::next_message`].
//!
//! [`CallOptions::cancellation_token`]: crate::CallOptions::cancellation_token

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use futures::future::BoxFuture;
use piperpc_core::{Metadata, Status};
use tokio_util::sync::CancellationToken;

use super::reader::MessageReader;
use crate::ClientError;
use crate::call::CallContext;
use crate::codec::{Encoding, MessageDecoder};

type PendingRead<T> = BoxFuture<'static, Result<Option<T>, ClientError>>;

/// Stream of response messages.
///
/// The stream yields each message in arrival order and ends after the
/// server's trailers. A failed call yields its error once, then ends.
///
/// # Example
///
/// ```ignore
/// let mut stream = client.call_server_stream::<Req, Res>("/pkg.Service/List", &req).await?;
///
/// while let Some(result) = stream.next().await {
///     match result {
///         Ok(msg) => println!("Got message: {:?}", msg),
///         Err(e) => eprintln!("Error: {:?}", e),
///     }
/// }
///
/// // After the stream is consumed, trailers are available
/// let trailers = stream.trailers()?;
/// ```
pub struct Streaming<T, D = Encoding> {
    reader: Arc<MessageReader<T, D>>,
    pending: Option<PendingRead<T>>,
    finished: bool,
}

impl<T, D> Streaming<T, D>
where
    T: Send + 'static,
    D: MessageDecoder<T> + 'static,
{
    /// Create a stream over the messages of `reader`.
    pub fn new(reader: MessageReader<T, D>) -> Self {
        Self {
            reader: Arc::new(reader),
            pending: None,
            finished: false,
        }
    }

    /// The underlying call.
    pub fn call(&self) -> &Arc<CallContext> {
        self.reader.call()
    }

    /// Wait for the response headers.
    pub async fn headers(&self) -> Result<Metadata, ClientError> {
        self.call().response_headers().await
    }

    /// The trailers, once the stream has been consumed.
    pub fn trailers(&self) -> Result<Metadata, ClientError> {
        self.call().trailers()
    }

    /// The final status, once the stream has been consumed.
    pub fn status(&self) -> Result<Status, ClientError> {
        self.call().status()
    }

    /// Check if the stream has finished.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read the next message, aborting the wait if `token` fires.
    ///
    /// A cancelled read only ends this wait: the call stays alive and a
    /// later read still sees every message. If a read started through the
    /// [`Stream`] impl is still in flight, it is completed first.
    pub async fn next_message(
        &mut self,
        token: &CancellationToken,
    ) -> Option<Result<T, ClientError>> {
        if self.finished {
            return None;
        }
        let result = match self.pending.take() {
            Some(pending) => pending.await,
            None => self.reader.next_message(token).await,
        };
        self.settle(result, !token.is_cancelled())
    }

    /// Gracefully drain all remaining messages from the stream.
    ///
    /// Returns the number of messages that were drained (not including
    /// errors). Trailers are available afterwards.
    pub async fn drain(&mut self) -> usize {
        use futures::StreamExt;
        let mut count = 0;
        while let Some(result) = self.next().await {
            if result.is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Gracefully drain remaining messages with a timeout.
    ///
    /// Returns `Ok(count)` if the stream was fully drained, or `Err(count)`
    /// if the timeout expired first.
    pub async fn drain_timeout(&mut self, timeout: std::time::Duration) -> Result<usize, usize> {
        use futures::StreamExt;
        let mut count = 0;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline) => {
                    return Err(count);
                }

                item = self.next() => {
                    match item {
                        Some(Ok(_)) => count += 1,
                        Some(Err(_)) => {}
                        None => return Ok(count),
                    }
                }
            }
        }
    }

    /// Map a read outcome to a stream item. A read aborted by a per-read
    /// token does not end the stream.
    fn settle(
        &mut self,
        result: Result<Option<T>, ClientError>,
        terminal_on_error: bool,
    ) -> Option<Result<T, ClientError>> {
        match result {
            Ok(Some(message)) => Some(Ok(message)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                if terminal_on_error || !err.is_cancelled() {
                    self.finished = true;
                }
                Some(Err(err))
            }
        }
    }
}

impl<T, D> Stream for Streaming<T, D>
where
    T: Send + 'static,
    D: MessageDecoder<T> + 'static,
{
    type Item = Result<T, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        let reader = &this.reader;
        let pending = this.pending.get_or_insert_with(|| {
            let reader = reader.clone();
            let read: PendingRead<T> =
                Box::pin(async move { reader.next_message(&CancellationToken::new()).await });
            read
        });
        let result = futures::ready!(pending.as_mut().poll(cx));
        this.pending = None;
        Poll::Ready(this.settle(result, true))
    }
}

impl<T, D> std::fmt::Debug for Streaming<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streaming")
            .field("reader", &self.reader)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
