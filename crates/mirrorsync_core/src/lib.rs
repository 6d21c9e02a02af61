//! # MirrorSync Core
//!
//! The device-side half of an offline-first mirror.
//!
//! This crate provides:
//! - [`Context`], the session object owning the mirror and the credential
//! - [`LocalStore`], the durable, observable entity mirror
//! - [`PendingOperationQueue`], the durable FIFO of unsynced local mutations
//! - [`WriteTxn`], atomic multi-step writes across both
//! - the journal that makes all of the above crash-safe
//!
//! Everything here is synchronous and performs no network I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod config;
mod context;
mod dir;
mod error;
mod filter;
pub mod journal;
mod queue;
mod state;
mod store;
mod transaction;

pub use change_feed::{ChangeEvent, ChangeFeed, ChangeKind};
pub use config::Config;
pub use context::{CompactionStats, Context};
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use filter::EntityFilter;
pub use queue::PendingOperationQueue;
pub use store::LocalStore;
pub use transaction::WriteTxn;
