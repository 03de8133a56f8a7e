//! In-memory server side of a call for unit tests.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use piperpc_core::{Frame, FrameCodec, Metadata, Status};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::transport::{Connector, PipeStream};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Connector handing the server half of each new duplex pipe to a [`FakeServer`].
#[derive(Debug)]
pub(crate) struct DuplexConnector {
    accepted: mpsc::UnboundedSender<DuplexStream>,
    attempts: AtomicUsize,
}

impl DuplexConnector {
    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for DuplexConnector {
    fn connect(&self) -> BoxFuture<'_, io::Result<PipeStream>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
            self.accepted
                .send(server)
                .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "server gone"))?;
            Ok(Box::new(client) as PipeStream)
        })
    }
}

/// Connector whose every attempt is refused.
#[derive(Debug, Default)]
pub(crate) struct RefusingConnector;

impl Connector for RefusingConnector {
    fn connect(&self) -> BoxFuture<'_, io::Result<PipeStream>> {
        Box::pin(async {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        })
    }
}

/// Accepts the connections made through a [`DuplexConnector`].
pub(crate) struct FakeServer {
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl FakeServer {
    pub(crate) async fn accept(&mut self) -> ServerConn {
        let stream = self.incoming.recv().await.expect("connector dropped");
        ServerConn {
            frames: Framed::new(stream, FrameCodec::new()),
        }
    }
}

/// Create a connector and the fake server behind it.
pub(crate) fn fake_server() -> (Arc<DuplexConnector>, FakeServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = Arc::new(DuplexConnector {
        accepted: tx,
        attempts: AtomicUsize::new(0),
    });
    (connector, FakeServer { incoming: rx })
}

/// Server end of one call.
pub(crate) struct ServerConn {
    frames: Framed<DuplexStream, FrameCodec>,
}

/// What the client sent to open a call.
#[derive(Debug)]
pub(crate) struct Opened {
    pub method: String,
    pub deadline: Option<std::time::SystemTime>,
    pub metadata: Metadata,
}

impl ServerConn {
    /// Next frame from the client, `None` once it closed its side.
    pub(crate) async fn recv(&mut self) -> Option<Frame> {
        self.frames.next().await.map(|frame| frame.expect("client sent a bad frame"))
    }

    /// Read `RequestInit` and `Headers`.
    pub(crate) async fn opened(&mut self) -> Opened {
        let (method, deadline) = match self.recv().await {
            Some(Frame::RequestInit { method, deadline }) => (method, deadline),
            other => panic!("expected request init, got {other:?}"),
        };
        let metadata = match self.recv().await {
            Some(Frame::Headers(metadata)) => metadata,
            other => panic!("expected headers, got {other:?}"),
        };
        Opened {
            method,
            deadline,
            metadata,
        }
    }

    /// Read one request payload.
    pub(crate) async fn payload(&mut self) -> Bytes {
        match self.recv().await {
            Some(Frame::Payload(payload)) => payload,
            other => panic!("expected payload, got {other:?}"),
        }
    }

    pub(crate) async fn send(&mut self, frame: Frame) {
        self.frames.send(frame).await.expect("client went away");
    }

    pub(crate) async fn send_headers(&mut self, metadata: Metadata) {
        self.send(Frame::Headers(metadata)).await;
    }

    pub(crate) async fn send_payload(&mut self, payload: &'static [u8]) {
        self.send(Frame::Payload(Bytes::from_static(payload))).await;
    }

    pub(crate) async fn send_trailers(&mut self, status: Status) {
        self.send(Frame::Trailers {
            metadata: Metadata::new(),
            status,
        })
        .await;
    }

    /// Close the server side without sending trailers.
    pub(crate) async fn hang_up(mut self) {
        let _ = self.frames.close().await;
    }
}
