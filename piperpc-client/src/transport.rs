//! Pipe transport for piperpc calls.
//!
//! This module provides the connection side of a call:
//!
//! - [`Connector`]: opens one duplex stream per call
//! - [`FrameWriter`] / [`FrameBatch`]: atomic multi-frame writes
//! - [`FrameReader`]: the inbound frame stream decoded by
//!   [`FrameCodec`](piperpc_core::FrameCodec)
//!
//! # Example
//!
//! ```ignore
//! use piperpc_client::transport::UnixConnector;
//!
//! let client = PipeClient::builder(UnixConnector::new("/run/my-service.sock"))
//!     .use_proto()
//!     .build();
//! ```

mod connector;
mod writer;

use piperpc_core::FrameCodec;
use tokio::io::ReadHalf;
use tokio_util::codec::FramedRead;

pub use connector::{AsyncDuplex, Connector, PipeStream, pipe_path};
pub use writer::{FrameBatch, FrameWriter};

#[cfg(unix)]
pub use connector::UnixConnector;

#[cfg(windows)]
pub use connector::NamedPipeConnector;

/// Inbound frames of a call connection.
pub type FrameReader = FramedRead<ReadHalf<PipeStream>, FrameCodec>;

/// Switch a raw connection into frame mode and split it.
pub fn into_frames(stream: PipeStream, codec: FrameCodec) -> (FrameReader, FrameWriter) {
    let (read, write) = tokio::io::split(stream);
    let reader = FramedRead::new(read, codec.clone());
    (reader, FrameWriter::new(write, codec))
}
