//! Client builder for the piperpc client.
//!
//! Provides a fluent API for configuring and building a [`PipeClient`].

use std::sync::Arc;
use std::time::Duration;

use piperpc_core::DEFAULT_MAX_FRAME_SIZE;

use crate::client::PipeClient;
use crate::codec::Encoding;
use crate::transport::Connector;

/// Builder for creating a [`PipeClient`].
///
/// # Example
///
/// ```ignore
/// use piperpc_client::ClientBuilder;
/// use std::time::Duration;
///
/// let client = ClientBuilder::unix("/run/echo.sock")
///     .use_proto()
///     .timeout(Duration::from_secs(30))
///     .build();
/// ```
pub struct ClientBuilder {
    /// Opens one connection per call.
    connector: Arc<dyn Connector>,
    /// Message encoding for requests and responses.
    encoding: Encoding,
    /// Default timeout for RPC calls.
    default_timeout: Option<Duration>,
    /// Largest frame accepted or sent.
    max_frame_size: usize,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("encoding", &self.encoding)
            .field("default_timeout", &self.default_timeout)
            .field("max_frame_size", &self.max_frame_size)
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Create a new ClientBuilder connecting through `connector`.
    pub fn new<C: Connector>(connector: C) -> Self {
        Self::from_arc(Arc::new(connector))
    }

    /// Create a new ClientBuilder from a shared connector.
    pub fn from_arc(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            encoding: Encoding::Json, // Default to JSON for broader compatibility
            default_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a builder for the Unix domain socket at `path`.
    #[cfg(unix)]
    pub fn unix<P: Into<std::path::PathBuf>>(path: P) -> Self {
        Self::new(crate::transport::UnixConnector::new(path))
    }

    /// Create a builder for the local named pipe `name`.
    #[cfg(windows)]
    pub fn named_pipe<S: AsRef<str>>(name: S, options: crate::config::ChannelOptions) -> Self {
        Self::new(crate::transport::NamedPipeConnector::with_options(name, options))
    }

    /// Use JSON encoding for requests and responses.
    ///
    /// This is the default encoding.
    pub fn use_json(mut self) -> Self {
        self.encoding = Encoding::Json;
        self
    }

    /// Use protobuf encoding for requests and responses.
    ///
    /// Protobuf is more compact than JSON but requires the server to accept
    /// protobuf payloads.
    pub fn use_proto(mut self) -> Self {
        self.encoding = Encoding::Proto;
        self
    }

    /// Set a default timeout for all RPC calls.
    ///
    /// The timeout becomes the call deadline, sent to the server in the
    /// request-init frame. Per-call deadlines and timeouts set through
    /// [`CallOptions`] take precedence.
    ///
    /// [`CallOptions`]: crate::CallOptions
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set the largest frame the client sends or accepts.
    ///
    /// Defaults to [`DEFAULT_MAX_FRAME_SIZE`].
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Build the PipeClient.
    pub fn build(self) -> PipeClient {
        PipeClient::new(
            self.connector,
            self.encoding,
            self.default_timeout,
            self.max_frame_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fake_server;

    #[test]
    fn test_builder_defaults() {
        let (connector, _server) = fake_server();
        let client = ClientBuilder::from_arc(connector).build();
        assert!(!client.is_proto());
        assert_eq!(client.default_timeout(), None);
        assert_eq!(client.max_frame_size(), DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_builder_options() {
        let (connector, _server) = fake_server();
        let client = ClientBuilder::from_arc(connector)
            .use_proto()
            .timeout(Duration::from_secs(5))
            .max_frame_size(1024)
            .build();
        assert!(client.is_proto());
        assert_eq!(client.default_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(client.max_frame_size(), 1024);
    }
}
