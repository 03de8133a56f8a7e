//! Request-side types for the piperpc client.
//!
//! This module contains the write side of streaming calls:
//! - [`RequestStream`]: Sends typed request messages on an open call
//! - [`ClientStreaming`]: A client-streaming call awaiting its single response

mod stream;

pub use stream::{ClientStreaming, RequestStream};
