//! Call options for per-request configuration.
//!
//! This module provides [`CallOptions`] for configuring individual RPC calls
//! with deadlines, request metadata and a cancellation token.

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use piperpc_core::Metadata;
use tokio_util::sync::CancellationToken;

/// Options for configuring individual RPC calls.
///
/// # Example
///
/// ```ignore
/// use piperpc_client::CallOptions;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// let cancel = CancellationToken::new();
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .header("x-request-id", "abc-123")
///     .cancellation_token(cancel.clone());
///
/// let response = client.call_unary_with_options::<Req, Res>(
///     "/my.Service/Method",
///     &request,
///     options,
/// ).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Absolute deadline for this call.
    pub(crate) deadline: Option<SystemTime>,
    /// Relative timeout, converted to a deadline when the call starts.
    pub(crate) timeout: Option<Duration>,
    /// Request metadata sent in the headers frame.
    pub(crate) metadata: Metadata,
    /// Token cancelling the whole call.
    pub(crate) cancellation_token: Option<CancellationToken>,
}

impl CallOptions {
    /// Create new default call options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an absolute deadline for this call.
    ///
    /// The deadline is sent to the server in the request-init frame and
    /// aborts local waits once it passes.
    pub fn deadline(mut self, deadline: SystemTime) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a timeout for this call, overriding the client default.
    ///
    /// If both a deadline and a timeout are set, the earlier one applies.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the configured deadline, if any.
    pub fn get_deadline(&self) -> Option<SystemTime> {
        self.deadline
    }

    /// Get the configured timeout, if any.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Add an ASCII metadata entry.
    ///
    /// # Panics
    ///
    /// Panics if the key or value is invalid. Use
    /// [`try_header`](Self::try_header) for untrusted input.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        self.metadata
            .insert(key, value)
            .expect("invalid metadata entry");
        self
    }

    /// Try to add an ASCII metadata entry.
    ///
    /// Returns `None` if the key or value is invalid.
    pub fn try_header<K, V>(mut self, key: K, value: V) -> Option<Self>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        self.metadata.insert(key, value).ok()?;
        Some(self)
    }

    /// Add a binary metadata entry. The key must end in `-bin`.
    ///
    /// # Panics
    ///
    /// Panics if the key is invalid.
    pub fn binary_header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: Into<Bytes>,
    {
        self.metadata
            .insert_bin(key, value)
            .expect("invalid binary metadata entry");
        self
    }

    /// Set all request metadata, replacing any existing entries.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Get a reference to the request metadata.
    pub fn get_metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Get a mutable reference to the request metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Cancel the call when `token` is cancelled.
    ///
    /// Cancelling sends a cancel frame to the server and fails any pending
    /// read with [`ClientError::Cancelled`](crate::ClientError::Cancelled).
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Get the call's cancellation token, if one was set.
    pub fn get_cancellation_token(&self) -> Option<&CancellationToken> {
        self.cancellation_token.as_ref()
    }

    /// Resolve the effective deadline, falling back to `default_timeout`.
    pub(crate) fn effective_deadline(&self, default_timeout: Option<Duration>) -> Option<SystemTime> {
        let from_timeout = self
            .timeout
            .or(default_timeout)
            .map(|t| SystemTime::now() + t);
        match (self.deadline, from_timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
