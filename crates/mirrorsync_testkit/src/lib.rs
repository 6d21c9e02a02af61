//! # MirrorSync Testkit
//!
//! Test utilities for MirrorSync.
//!
//! This crate provides:
//! - `MemoryRemote`, an in-memory server with versions, ownership,
//!   conflict and not-found semantics, failure injection and a call log
//! - `MemoryPushConnector`, an in-memory push channel the server double
//!   broadcasts into
//! - Context fixtures and entity builders
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mirrorsync_testkit::prelude::*;
//!
//! let remote = MemoryRemote::new();
//! let ctx = TestContext::memory();
//! ctx.set_credential("u1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod push;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::push::*;
    pub use crate::remote::*;
}

pub use fixtures::*;
pub use generators::*;
pub use push::*;
pub use remote::*;
