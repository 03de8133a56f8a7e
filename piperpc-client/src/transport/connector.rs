//! Connection establishment.
//!
//! A [`Connector`] opens one duplex byte stream to the server endpoint per
//! call. The platform connectors are:
//!
//! - [`UnixConnector`] (unix): a Unix domain socket at a filesystem path
//! - [`NamedPipeConnector`] (windows): a named pipe `\\.\pipe\<name>`
//!
//! Anything implementing `AsyncRead + AsyncWrite` can be plugged in through
//! a custom [`Connector`], which is how tests run against in-memory pipes.

use std::io;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

#[cfg(windows)]
use crate::config::ChannelOptions;

/// A bidirectional byte stream usable as a call connection.
pub trait AsyncDuplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncDuplex for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed connection returned by a [`Connector`].
pub type PipeStream = Box<dyn AsyncDuplex>;

/// Opens connections to a server endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Connect to the endpoint. Each call gets its own connection.
    fn connect(&self) -> BoxFuture<'_, io::Result<PipeStream>>;
}

/// Connects to a Unix domain socket.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl UnixConnector {
    /// Create a connector for the socket at `path`.
    pub fn new<P: Into<std::path::PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// The socket path.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[cfg(unix)]
impl Connector for UnixConnector {
    fn connect(&self) -> BoxFuture<'_, io::Result<PipeStream>> {
        Box::pin(async move {
            let stream = tokio::net::UnixStream::connect(&self.path).await?;
            Ok(Box::new(stream) as PipeStream)
        })
    }
}

/// Connects to a Windows named pipe.
#[cfg(windows)]
#[derive(Debug, Clone)]
pub struct NamedPipeConnector {
    path: String,
    options: ChannelOptions,
}

#[cfg(windows)]
impl NamedPipeConnector {
    /// Create a connector for the pipe called `name` on the local machine.
    pub fn new<S: AsRef<str>>(name: S) -> Self {
        Self::with_options(name, ChannelOptions::default())
    }

    /// Create a connector with explicit channel options.
    pub fn with_options<S: AsRef<str>>(name: S, options: ChannelOptions) -> Self {
        Self {
            path: pipe_path(name.as_ref()),
            options,
        }
    }

    /// The full pipe path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(windows)]
impl Connector for NamedPipeConnector {
    fn connect(&self) -> BoxFuture<'_, io::Result<PipeStream>> {
        use std::time::Duration;
        use tokio::net::windows::named_pipe::ClientOptions;

        const ERROR_PIPE_BUSY: i32 = 231;
        const BUSY_RETRY_DELAY: Duration = Duration::from_millis(50);

        Box::pin(async move {
            let mut opts = ClientOptions::new();
            if let Some(level) = self.options.get_impersonation_level() {
                opts.security_qos_flags(level.security_qos_flags());
            }
            loop {
                match opts.open(&self.path) {
                    Ok(client) => return Ok(Box::new(client) as PipeStream),
                    Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {}
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(BUSY_RETRY_DELAY).await;
            }
        })
    }
}

/// Build the local pipe path for a pipe name.
///
/// Names that already are full pipe paths are returned unchanged.
pub fn pipe_path(name: &str) -> String {
    if name.starts_with(r"\\") {
        name.to_string()
    } else {
        format!(r"\\.\pipe\{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_path() {
        assert_eq!(pipe_path("my-service"), r"\\.\pipe\my-service");
        assert_eq!(pipe_path(r"\\.\pipe\already"), r"\\.\pipe\already");
        assert_eq!(pipe_path(r"\\server\pipe\remote"), r"\\server\pipe\remote");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_connector_reports_missing_socket() {
        let connector = UnixConnector::new("/nonexistent/piperpc-test.sock");
        let err = connector.connect().await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unary_call_over_unix_socket() {
        use futures::{SinkExt, StreamExt};
        use piperpc_core::{Frame, FrameCodec, Metadata, Status};
        use tokio_util::codec::Framed;

        use crate::PipeClient;
        use crate::codec::tests::Echo;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echo.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut frames = Framed::new(stream, FrameCodec::new());
            let method = match frames.next().await.unwrap().unwrap() {
                Frame::RequestInit { method, .. } => method,
                other => panic!("expected request init, got {other:?}"),
            };
            assert!(matches!(frames.next().await, Some(Ok(Frame::Headers(_)))));
            let request = match frames.next().await.unwrap().unwrap() {
                Frame::Payload(payload) => payload,
                other => panic!("expected payload, got {other:?}"),
            };
            frames.send(Frame::Headers(Metadata::new())).await.unwrap();
            frames.send(Frame::Payload(request)).await.unwrap();
            frames
                .send(Frame::Trailers {
                    metadata: Metadata::new(),
                    status: Status::ok(),
                })
                .await
                .unwrap();
            method
        });

        let client = PipeClient::builder(UnixConnector::new(path.clone())).use_proto().build();
        let response = client
            .call_unary::<Echo, Echo>("/echo.Echo/Say", &Echo::new("hello"))
            .await
            .unwrap();

        assert_eq!(response.into_inner().text, "hello");
        assert_eq!(server.await.unwrap(), "/echo.Echo/Say");
    }
}
