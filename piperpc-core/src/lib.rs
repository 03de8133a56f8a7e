//! Core protocol types for piperpc.
//!
//! This crate provides the types shared by anything speaking the pipe
//! protocol: the client in `piperpc-client`, and servers or test doubles.
//!
//! ## Modules
//!
//! - [`error`]: Status codes, call status and frame errors
//! - [`metadata`]: Header and trailer metadata
//! - [`frame`]: The frame type and its length-delimited codec

mod error;
mod frame;
mod metadata;

pub use error::*;
pub use frame::*;
pub use metadata::*;
