//! Typed request streams.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::ClientError;
use crate::call::CallContext;
use crate::codec::{Encoding, MessageDecoder, MessageEncoder};
use crate::response::{MessageReader, Response};

/// Sends request messages on a client-streaming or bidi call.
///
/// # Example
///
/// ```ignore
/// let (requests, mut responses) = client.call_bidi_stream::<Req, Res>("/pkg.Chat/Talk").await?;
///
/// requests.send(&Req { text: "hello".into() }).await?;
/// requests.complete().await?;
///
/// while let Some(reply) = responses.next().await {
///     println!("{:?}", reply?);
/// }
/// ```
pub struct RequestStream<T, E = Encoding> {
    call: Arc<CallContext>,
    encoder: E,
    _message: PhantomData<fn(&T)>,
}

impl<T, E> RequestStream<T, E>
where
    E: MessageEncoder<T>,
{
    /// Create a request stream writing to `call`.
    pub fn new(call: Arc<CallContext>, encoder: E) -> Self {
        Self {
            call,
            encoder,
            _message: PhantomData,
        }
    }

    /// The underlying call.
    pub fn call(&self) -> &Arc<CallContext> {
        &self.call
    }

    /// Encode and send one request message.
    ///
    /// # Errors
    ///
    /// [`ClientError::Encode`] if the message cannot be serialized,
    /// `Cancelled` / `DeadlineExceeded` once the call was cancelled or
    /// timed out, [`ClientError::InvalidState`] after
    /// [`complete`](Self::complete).
    pub async fn send(&self, message: &T) -> Result<(), ClientError> {
        let payload = self.encoder.encode(message)?;
        self.call.send_message(payload).await
    }

    /// Tell the server no more request messages follow.
    pub async fn complete(&self) -> Result<(), ClientError> {
        self.call.complete_request().await
    }
}

impl<T, E> std::fmt::Debug for RequestStream<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestStream")
            .field("call", &self.call)
            .finish_non_exhaustive()
    }
}

/// A client-streaming call: many request messages, one response.
pub struct ClientStreaming<Req, Res> {
    requests: RequestStream<Req>,
    reader: MessageReader<Res>,
}

impl<Req, Res> ClientStreaming<Req, Res>
where
    Encoding: MessageEncoder<Req> + MessageDecoder<Res>,
{
    pub(crate) fn new(call: Arc<CallContext>, encoding: Encoding) -> Self {
        Self {
            requests: RequestStream::new(call.clone(), encoding),
            reader: MessageReader::new(call, encoding),
        }
    }

    /// Encode and send one request message.
    pub async fn send(&self, message: &Req) -> Result<(), ClientError> {
        self.requests.send(message).await
    }

    /// Complete the request stream and wait for the response.
    ///
    /// The response is only returned if the call finished with an OK status.
    pub async fn finish(self) -> Result<Response<Res>, ClientError> {
        if let Err(_err) = self.requests.complete().await {
            // the server may have answered before reading every request;
            // the response carries the outcome either way
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %_err, "request stream not completed");
        }
        self.reader.read_unary().await
    }
}

impl<Req, Res> std::fmt::Debug for ClientStreaming<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStreaming")
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}
