//! Outbound side of a call connection.

use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use piperpc_core::{Frame, FrameCodec, Metadata};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::Encoder;

use crate::ClientError;

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Write half of a connection, shared by the caller and the cancel task.
///
/// Frames are grouped into a [`FrameBatch`] and committed with a single
/// write under the lock, so batches from different tasks never interleave.
pub struct FrameWriter {
    sink: Mutex<Option<BoxedWrite>>,
    codec: FrameCodec,
}

impl FrameWriter {
    /// Wrap the write half of a connection.
    pub fn new<W>(io: W, codec: FrameCodec) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            sink: Mutex::new(Some(Box::new(io))),
            codec,
        }
    }

    /// Start a batch of frames to commit together.
    pub fn batch(&self) -> FrameBatch<'_> {
        FrameBatch {
            writer: self,
            frames: Vec::new(),
        }
    }

    /// Shut the write side down. Later commits fail.
    pub async fn close(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            // the peer may already be gone; closing is best effort
            let _ = sink.shutdown().await;
        }
    }

    /// Whether [`close`](Self::close) has run.
    pub async fn is_closed(&self) -> bool {
        self.sink.lock().await.is_none()
    }

    async fn commit(&self, frames: Vec<Frame>) -> Result<(), ClientError> {
        let mut codec = self.codec.clone();
        let mut buf = BytesMut::new();
        for frame in frames {
            codec.encode(frame, &mut buf)?;
        }

        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| ClientError::Transport("connection closed".into()))?;
        sink.write_all(&buf).await?;
        sink.flush().await?;
        Ok(())
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("max_frame_size", &self.codec.max_frame_size())
            .finish_non_exhaustive()
    }
}

/// Frames committed as one atomic unit.
#[must_use = "a batch does nothing until committed"]
pub struct FrameBatch<'a> {
    writer: &'a FrameWriter,
    frames: Vec<Frame>,
}

impl FrameBatch<'_> {
    /// Add a `RequestInit` frame.
    pub fn request_init(mut self, method: &str, deadline: Option<SystemTime>) -> Self {
        self.frames.push(Frame::RequestInit {
            method: method.to_string(),
            deadline,
        });
        self
    }

    /// Add a `Headers` frame.
    pub fn headers(mut self, metadata: Metadata) -> Self {
        self.frames.push(Frame::Headers(metadata));
        self
    }

    /// Add a `Payload` frame.
    pub fn payload(mut self, payload: Bytes) -> Self {
        self.frames.push(Frame::Payload(payload));
        self
    }

    /// Add a `Cancel` frame.
    pub fn cancel(mut self) -> Self {
        self.frames.push(Frame::Cancel);
        self
    }

    /// Add a `StreamEnd` frame.
    pub fn stream_end(mut self) -> Self {
        self.frames.push(Frame::StreamEnd);
        self
    }

    /// Write all frames with one write.
    pub async fn commit(self) -> Result<(), ClientError> {
        self.writer.commit(self.frames).await
    }
}
