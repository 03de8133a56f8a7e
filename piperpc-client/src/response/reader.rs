//! Typed, cancellable reads of response messages.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::Response;
use crate::ClientError;
use crate::call::{CallContext, QueueError, classify, first_cancelled};
use crate::codec::{Encoding, MessageDecoder};

/// Reads response messages of one call.
///
/// Every wait is bounded by three sources: the token passed to the read,
/// the call's cancellation token and the call deadline. An aborted wait
/// reports [`ClientError::DeadlineExceeded`] if the deadline has fired and
/// [`ClientError::Cancelled`] otherwise, and never loses a queued message.
pub struct MessageReader<T, D = Encoding> {
    call: Arc<CallContext>,
    decoder: D,
    _message: PhantomData<fn() -> T>,
}

impl<T, D> MessageReader<T, D>
where
    D: MessageDecoder<T>,
{
    /// Create a reader for `call` that decodes messages with `decoder`.
    pub fn new(call: Arc<CallContext>, decoder: D) -> Self {
        Self {
            call,
            decoder,
            _message: PhantomData,
        }
    }

    /// The call being read.
    pub fn call(&self) -> &Arc<CallContext> {
        &self.call
    }

    /// Move to the next message.
    ///
    /// Returns `Ok(true)` when a message is available through
    /// [`current`](Self::current) and `Ok(false)` at the end of a successful
    /// stream.
    ///
    /// # Errors
    ///
    /// The call's terminal error (a failed status, a transport failure), or
    /// `Cancelled` / `DeadlineExceeded` if the wait was aborted.
    pub async fn advance(&self, token: &CancellationToken) -> Result<bool, ClientError> {
        let call = &self.call;
        let cancelled = first_cancelled(token, call.token(), call.deadline());
        match call.queue().advance_until(cancelled).await {
            Ok(more) => Ok(more),
            Err(QueueError::Failed(err)) => Err(err),
            Err(QueueError::Cancelled(source)) => Err(classify(source, call.deadline())),
        }
    }

    /// Decode the message reached by the last successful
    /// [`advance`](Self::advance).
    pub fn current(&self) -> Result<T, ClientError> {
        let payload = self
            .call
            .queue()
            .current()
            .ok_or_else(|| ClientError::invalid_state("no current message"))?;
        self.decoder.decode(&payload)
    }

    /// Read the next message, or `None` at the end of the stream.
    pub async fn next_message(&self, token: &CancellationToken) -> Result<Option<T>, ClientError> {
        if self.advance(token).await? {
            self.current().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Read exactly one more message.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidState`] if the stream ended instead.
    pub async fn read_next_message(&self, token: &CancellationToken) -> Result<T, ClientError> {
        self.next_message(token)
            .await?
            .ok_or_else(|| ClientError::invalid_state("expected payload"))
    }

    /// Read the single response of a server-unary call.
    ///
    /// The message is only returned together with an OK status.
    pub(crate) async fn read_unary(&self) -> Result<Response<T>, ClientError> {
        let message = self.read_next_message(&CancellationToken::new()).await?;

        let status = self.call.status()?;
        if !status.is_ok() {
            return Err(status.into());
        }
        let headers = self.call.response_headers().await?;
        Ok(Response::new(message, headers, self.call.trailers()?))
    }
}

impl<T, D> std::fmt::Debug for MessageReader<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReader")
            .field("call", &self.call)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::Echo;
    use crate::config::CallOptions;
    use crate::testing::{ServerConn, fake_server};
    use bytes::Bytes;
    use piperpc_core::{Code, Frame, Status};
    use std::time::Duration;

    fn encode(text: &str) -> Bytes {
        crate::codec::MessageEncoder::encode(&Encoding::Proto, &Echo::new(text)).unwrap()
    }

    async fn open(
        options: CallOptions,
        server_unary: bool,
    ) -> (MessageReader<Echo>, ServerConn) {
        let (connector, mut server) = fake_server();
        let call = CallContext::new(connector, options, server_unary);
        call.start("/echo.Echo/Say", None).await.unwrap();
        let mut conn = server.accept().await;
        conn.opened().await;
        (MessageReader::new(Arc::new(call), Encoding::Proto), conn)
    }

    #[tokio::test]
    async fn test_read_messages_then_end() {
        let (reader, mut conn) = open(CallOptions::new(), false).await;
        conn.send(Frame::Payload(encode("a"))).await;
        conn.send(Frame::Payload(encode("b"))).await;
        conn.send_trailers(Status::ok()).await;

        let token = CancellationToken::new();
        assert_eq!(reader.read_next_message(&token).await.unwrap().text, "a");
        assert_eq!(reader.read_next_message(&token).await.unwrap().text, "b");

        let err = reader.read_next_message(&token).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(msg) if msg == "expected payload"));
        assert!(!reader.advance(&token).await.unwrap());
    }

    #[tokio::test]
    async fn test_current_without_advance() {
        let (reader, _conn) = open(CallOptions::new(), false).await;
        assert!(matches!(reader.current(), Err(ClientError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_read_token_cancel_keeps_later_message() {
        let (reader, mut conn) = open(CallOptions::new(), false).await;

        let token = CancellationToken::new();
        token.cancel();
        let err = reader.advance(&token).await.unwrap_err();
        assert!(err.is_cancelled());
        // the call itself is still alive
        assert!(!reader.call().token().is_cancelled());

        conn.send(Frame::Payload(encode("after"))).await;
        let fresh = CancellationToken::new();
        assert_eq!(reader.read_next_message(&fresh).await.unwrap().text, "after");
    }

    #[tokio::test]
    async fn test_call_cancel_fails_in_flight_read() {
        let cancel = CancellationToken::new();
        let options = CallOptions::new().cancellation_token(cancel.clone());
        let (reader, mut conn) = open(options, false).await;

        let reader = Arc::new(reader);
        let read = {
            let reader = reader.clone();
            tokio::spawn(async move { reader.advance(&CancellationToken::new()).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        assert!(read.await.unwrap().unwrap_err().is_cancelled());
        assert_eq!(conn.recv().await, Some(Frame::Cancel));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_wins_over_cancel() {
        let cancel = CancellationToken::new();
        let options = CallOptions::new()
            .timeout(Duration::from_millis(100))
            .cancellation_token(cancel.clone());
        let (reader, _conn) = open(options, false).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let token = CancellationToken::new();
        token.cancel();
        let err = reader.advance(&token).await.unwrap_err();
        assert!(err.is_deadline_exceeded());
    }

    #[tokio::test]
    async fn test_decode_failure() {
        let (reader, mut conn) = open(CallOptions::new(), false).await;
        conn.send_payload(b"\xff\xff").await;

        let err = reader
            .read_next_message(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[tokio::test]
    async fn test_read_unary_checks_status() {
        let (reader, mut conn) = open(CallOptions::new(), true).await;
        conn.send(Frame::Payload(encode("partial"))).await;
        conn.send_trailers(Status::not_found("gone")).await;

        let err = reader.read_unary().await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.message(), Some("gone"));
    }

    #[tokio::test]
    async fn test_read_unary_ok() {
        let (reader, mut conn) = open(CallOptions::new(), true).await;
        let mut headers = piperpc_core::Metadata::new();
        headers.insert("x-server", "1").unwrap();
        conn.send_headers(headers).await;
        conn.send(Frame::Payload(encode("pong"))).await;
        conn.send_trailers(Status::ok()).await;

        let response = reader.read_unary().await.unwrap();
        assert_eq!(response.text, "pong");
        assert_eq!(response.metadata().get("x-server"), Some("1"));
    }
}
