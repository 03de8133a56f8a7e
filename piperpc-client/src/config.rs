//! Configuration modules for the piperpc client.
//!
//! This module contains call and connection configuration:
//! - [`CallOptions`]: Per-call deadline, metadata and cancellation token
//! - [`ChannelOptions`]: Connection options such as the impersonation level

mod channel;
mod options;

pub use channel::{ChannelOptions, ImpersonationLevel};
pub use options::CallOptions;
