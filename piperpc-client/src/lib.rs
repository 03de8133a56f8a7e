//! RPC client over local duplex pipes.
//!
//! This crate provides the client side of piperpc: RPC calls carried over a
//! point-to-point, connection-oriented byte stream such as a Unix domain
//! socket or a Windows named pipe. Every call opens its own connection.
//!
//! ## Features
//!
//! - Unary RPC calls (request-response)
//! - Server streaming RPC calls
//! - Client streaming RPC calls
//! - Bidirectional streaming RPC calls
//! - Response headers, trailers and status codes
//! - Deadlines propagated to the server and enforced locally
//! - Explicit cancellation through [`CancellationToken`]s
//! - Both protobuf and JSON encoding support
//!
//! ## Example
//!
//! ```ignore
//! use piperpc_client::PipeClient;
//!
//! let client = PipeClient::builder(UnixConnector::new("/run/my-service.sock"))
//!     .use_proto()
//!     .build();
//!
//! let response = client.call_unary::<MyRequest, MyResponse>(
//!     "/my.package.MyService/MyMethod",
//!     &request,
//! ).await?;
//!
//! println!("Response: {:?}", response.into_inner());
//! ```
//!
//! ## Server Streaming Example
//!
//! ```ignore
//! use futures::StreamExt;
//!
//! let mut stream = client.call_server_stream::<ListRequest, ListItem>(
//!     "/items.v1.ItemService/ListItems",
//!     &request,
//! ).await?;
//!
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(item) => println!("Got item: {:?}", item),
//!         Err(e) => eprintln!("Error: {:?}", e),
//!     }
//! }
//!
//! // Trailers and status are available after consuming the stream
//! println!("Trailers: {:?}", stream.trailers()?);
//! ```
//!
//! ## Call Lifecycle
//!
//! A call connects, writes `RequestInit`, `Headers` and the request payload
//! as one unit, then reads the server's frames in a background task:
//! `Headers`, any number of `Payload`s and finally `Trailers` carrying the
//! status. Headers are always observable before the call completes; they
//! are empty if the server never sent any.
//!
//! Unary and client-streaming responses are held back until the trailers
//! arrive, so a message belonging to a failed call is never returned.
//!
//! ## Cancellation and Deadlines
//!
//! - Cancelling the call's token (see [`CallOptions::cancellation_token`])
//!   sends a `Cancel` frame once and fails pending reads with
//!   [`ClientError::Cancelled`].
//! - A deadline ([`CallOptions::deadline`], [`CallOptions::timeout`] or
//!   [`ClientBuilder::timeout`]) is sent to the server and fails pending
//!   reads with [`ClientError::DeadlineExceeded`]. Expiry does not send
//!   `Cancel`; the server enforces the deadline it was given.
//! - A token passed to a single read ([`Streaming::next_message`]) only
//!   aborts that wait.
//! - Dropping an unfinished call abandons it: `Cancel` is sent best effort
//!   and the connection is closed.
//!
//! If the call was already cancelled or its deadline already passed when
//! it starts, no connection is made at all.
//!
//! ## Feature Flags
//!
//! | Feature | Description | Dependencies |
//! |---------|-------------|--------------|
//! | `tracing` | Tracing spans for RPC calls | `tracing` |
//!
//! When enabled, each RPC call creates a span with:
//! - `rpc.method`: Full method name (e.g., "/package.Service/Method")
//! - `rpc.type`: Call type ("unary", "server_stream", "client_stream", "bidi_stream")
//! - `rpc.encoding`: Message encoding (`Json` or `Proto`)
//! - `otel.kind`: "client"
//!
//! ## Per-Call Options
//!
//! ```ignore
//! use piperpc_client::CallOptions;
//!
//! let options = CallOptions::new()
//!     .header("x-custom-header", "value")
//!     .timeout(std::time::Duration::from_secs(5));
//!
//! let response = client.call_unary_with_options::<Req, Res>(
//!     "/pkg.Service/Method",
//!     &request,
//!     options,
//! ).await?;
//! ```
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

mod builder;
pub mod call;
mod client;
pub mod codec;
pub mod config;
mod error;
pub mod request;
pub mod response;
pub mod transport;

#[cfg(test)]
mod testing;

pub use builder::ClientBuilder;
pub use client::PipeClient;
pub use error::ClientError;

pub use call::{CallContext, CallState, Deadline};
pub use codec::{Encoding, MessageDecoder, MessageEncoder};
pub use config::{CallOptions, ChannelOptions, ImpersonationLevel};
pub use request::{ClientStreaming, RequestStream};
pub use response::{MessageReader, Metadata, MetadataValue, Response, Streaming};

#[cfg(unix)]
pub use transport::UnixConnector;
#[cfg(windows)]
pub use transport::NamedPipeConnector;
pub use transport::Connector;

// Re-export core types that users need
pub use piperpc_core::{Code, Status};

// Re-export types used in public signatures
pub use bytes::Bytes;
pub use tokio_util::sync::CancellationToken;
