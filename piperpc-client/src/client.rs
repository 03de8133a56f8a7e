//! piperpc client implementation.
//!
//! This module provides the main [`PipeClient`] type for making RPC calls.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use piperpc_core::FrameCodec;
use prost::Message;
use serde::{Serialize, de::DeserializeOwned};
#[cfg(feature = "tracing")]
use tracing::{Instrument, info_span};

use crate::ClientError;
use crate::builder::ClientBuilder;
use crate::call::CallContext;
use crate::codec::{Encoding, MessageEncoder};
use crate::config::CallOptions;
use crate::request::{ClientStreaming, RequestStream};
use crate::response::{MessageReader, Response, Streaming};
use crate::transport::Connector;

/// piperpc client.
///
/// Every call opens its own connection through the client's [`Connector`].
/// The client is cheap to clone.
///
/// Use [`ClientBuilder`] or [`PipeClient::builder`] to create an instance.
///
/// # Example
///
/// ```ignore
/// use piperpc_client::{PipeClient, UnixConnector};
///
/// let client = PipeClient::builder(UnixConnector::new("/run/echo.sock"))
///     .use_proto()
///     .build();
///
/// let response = client.call_unary::<MyRequest, MyResponse>(
///     "/my.package.MyService/MyMethod",
///     &request,
/// ).await?;
/// ```
#[derive(Clone)]
pub struct PipeClient {
    /// Opens one connection per call.
    connector: Arc<dyn Connector>,
    /// Message encoding for requests and responses.
    encoding: Encoding,
    /// Default timeout for RPC calls.
    default_timeout: Option<Duration>,
    /// Largest frame sent or accepted.
    max_frame_size: usize,
}

impl std::fmt::Debug for PipeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeClient")
            .field("encoding", &self.encoding)
            .field("default_timeout", &self.default_timeout)
            .field("max_frame_size", &self.max_frame_size)
            .finish_non_exhaustive()
    }
}

impl PipeClient {
    /// Create a new ClientBuilder for `connector`.
    ///
    /// This is a convenience method equivalent to `ClientBuilder::new(connector)`.
    pub fn builder<C: Connector>(connector: C) -> ClientBuilder {
        ClientBuilder::new(connector)
    }

    /// Create a new PipeClient.
    ///
    /// This is called by [`ClientBuilder::build`]. Prefer using the builder API.
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        encoding: Encoding,
        default_timeout: Option<Duration>,
        max_frame_size: usize,
    ) -> Self {
        Self {
            connector,
            encoding,
            default_timeout,
            max_frame_size,
        }
    }

    /// Check if using protobuf encoding.
    pub fn is_proto(&self) -> bool {
        self.encoding.is_proto()
    }

    /// Get the default timeout for calls.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Get the maximum frame size.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Make a unary RPC call.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let response = client.call_unary::<GetUserRequest, GetUserResponse>(
    ///     "/users.v1.UserService/GetUser",
    ///     &GetUserRequest { id: "123".to_string() },
    /// ).await?;
    ///
    /// println!("User: {:?}", response.into_inner());
    /// ```
    pub async fn call_unary<Req, Res>(
        &self,
        method: &str,
        request: &Req,
    ) -> Result<Response<Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        self.call_unary_with_options(method, request, CallOptions::default())
            .await
    }

    /// Make a unary RPC call with per-call options.
    ///
    /// The response message is returned only if the call finished with an
    /// OK status; otherwise the status is returned as
    /// [`ClientError::Status`].
    pub async fn call_unary_with_options<Req, Res>(
        &self,
        method: &str,
        request: &Req,
        options: CallOptions,
    ) -> Result<Response<Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        let body = self.encoding.encode(request)?;
        let call = self
            .open(method, options, true, Some(body), "unary")
            .await?;
        MessageReader::new(call, self.encoding).read_unary().await
    }

    /// Make a server-streaming RPC call.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use futures::StreamExt;
    ///
    /// let mut stream = client.call_server_stream::<ListRequest, Item>(
    ///     "/items.v1.ItemService/List",
    ///     &ListRequest::default(),
    /// ).await?;
    ///
    /// while let Some(item) = stream.next().await {
    ///     println!("{:?}", item?);
    /// }
    /// ```
    pub async fn call_server_stream<Req, Res>(
        &self,
        method: &str,
        request: &Req,
    ) -> Result<Streaming<Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        self.call_server_stream_with_options(method, request, CallOptions::default())
            .await
    }

    /// Make a server-streaming RPC call with per-call options.
    pub async fn call_server_stream_with_options<Req, Res>(
        &self,
        method: &str,
        request: &Req,
        options: CallOptions,
    ) -> Result<Streaming<Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        let body = self.encoding.encode(request)?;
        let call = self
            .open(method, options, false, Some(body), "server_stream")
            .await?;
        Ok(Streaming::new(MessageReader::new(call, self.encoding)))
    }

    /// Start a client-streaming RPC call.
    ///
    /// Send requests with [`ClientStreaming::send`], then call
    /// [`ClientStreaming::finish`] for the single response.
    pub async fn call_client_stream<Req, Res>(
        &self,
        method: &str,
    ) -> Result<ClientStreaming<Req, Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        self.call_client_stream_with_options(method, CallOptions::default())
            .await
    }

    /// Start a client-streaming RPC call with per-call options.
    pub async fn call_client_stream_with_options<Req, Res>(
        &self,
        method: &str,
        options: CallOptions,
    ) -> Result<ClientStreaming<Req, Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        let call = self
            .open(method, options, true, None, "client_stream")
            .await?;
        Ok(ClientStreaming::new(call, self.encoding))
    }

    /// Start a bidirectional streaming RPC call.
    ///
    /// Returns the request side and the response stream, which may be used
    /// from different tasks.
    pub async fn call_bidi_stream<Req, Res>(
        &self,
        method: &str,
    ) -> Result<(RequestStream<Req>, Streaming<Res>), ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        self.call_bidi_stream_with_options(method, CallOptions::default())
            .await
    }

    /// Start a bidirectional streaming RPC call with per-call options.
    pub async fn call_bidi_stream_with_options<Req, Res>(
        &self,
        method: &str,
        options: CallOptions,
    ) -> Result<(RequestStream<Req>, Streaming<Res>), ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + 'static,
    {
        let call = self
            .open(method, options, false, None, "bidi_stream")
            .await?;
        let requests = RequestStream::new(call.clone(), self.encoding);
        let responses = Streaming::new(MessageReader::new(call, self.encoding));
        Ok((requests, responses))
    }

    /// Create and start a call.
    async fn open(
        &self,
        method: &str,
        mut options: CallOptions,
        server_unary: bool,
        request: Option<Bytes>,
        _rpc_type: &'static str,
    ) -> Result<Arc<CallContext>, ClientError> {
        if options.deadline.is_none() && options.timeout.is_none() {
            options.timeout = self.default_timeout;
        }
        let call = CallContext::new(self.connector.clone(), options, server_unary)
            .with_frame_codec(FrameCodec::with_max_frame_size(self.max_frame_size));

        let start = call.start(method, request);
        #[cfg(feature = "tracing")]
        let start = start.instrument(info_span!(
            "rpc.call",
            rpc.method = %method,
            rpc.type = _rpc_type,
            rpc.encoding = ?self.encoding,
            otel.kind = "client",
        ));
        start.await?;

        Ok(Arc::new(call))
    }
}
