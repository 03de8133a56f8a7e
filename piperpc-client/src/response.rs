//! Response types for the piperpc client.
//!
//! This module provides:
//! - [`Response`]: a unary response message with its headers and trailers
//! - [`MessageReader`]: the cancellable, typed read side of a call
//! - [`Streaming`]: a [`Stream`](futures::Stream) of response messages

mod reader;
mod streaming;

use std::ops::Deref;

pub use piperpc_core::{Metadata, MetadataValue};
pub use reader::MessageReader;
pub use streaming::Streaming;

/// Response wrapper for unary and client-streaming calls.
///
/// Contains the response message, the response headers and the trailers
/// sent with the final status.
///
/// # Example
///
/// ```ignore
/// let response = client.call_unary::<Req, Res>("/pkg.Service/Method", &req).await?;
///
/// // Access the response directly via Deref
/// println!("Name: {}", response.name);
///
/// if let Some(value) = response.metadata().get("x-custom-header") {
///     println!("Custom header: {value}");
/// }
///
/// let inner = response.into_inner();
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    inner: T,
    metadata: Metadata,
    trailers: Metadata,
}

impl<T> Response<T> {
    /// Create a new response from a message, its headers and trailers.
    pub fn new(inner: T, metadata: Metadata, trailers: Metadata) -> Self {
        Self {
            inner,
            metadata,
            trailers,
        }
    }

    /// Extract the inner value, discarding metadata.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Get a reference to the response headers.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Get a reference to the response trailers.
    pub fn trailers(&self) -> &Metadata {
        &self.trailers
    }

    /// Transform the inner value, preserving metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            inner: f(self.inner),
            metadata: self.metadata,
            trailers: self.trailers,
        }
    }

    /// Get a reference to the inner value.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Decompose into the message, headers and trailers.
    pub fn into_parts(self) -> (T, Metadata, Metadata) {
        (self.inner, self.metadata, self.trailers)
    }
}

impl<T> Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}
