//! Call lifecycle and its concurrency primitives.
//!
//! - [`CallContext`]: one RPC invocation from connection to completion
//! - [`Deadline`]: optional absolute expiry with a cancellation token
//! - [`PayloadQueue`]: ordered hand-off of response payloads
//! - [`ResolveOnce`]: the one-shot response headers cell
//! - [`first_cancelled`] / [`classify`]: merging cancellation sources

mod cancel;
mod context;
mod deadline;
mod once;
mod queue;

pub use cancel::{CancelSource, classify, first_cancelled};
pub use context::{CallContext, CallState};
pub use deadline::Deadline;
pub use once::ResolveOnce;
pub use queue::{PayloadQueue, QueueError};
