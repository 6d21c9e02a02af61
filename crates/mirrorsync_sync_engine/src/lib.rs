//! # MirrorSync Sync Engine
//!
//! Brings a local mirror and a remote server into agreement.
//!
//! This crate provides:
//! - The sync pass that drains the pending-operation queue
//! - Version-based conflict resolution (server wins)
//! - A tokio scheduler with periodic, on-demand and backoff-retry passes
//! - A connectivity monitor that triggers recovery on reconnect
//! - A live channel merging server-pushed events into the store
//! - An HTTP adapter for the REST surface
//! - The application-facing repository
//!
//! ## Architecture
//!
//! Writes land in the local store first, together with a queued
//! operation, in one atomic write. A pass replays the queue in FIFO order
//! against the server and folds each response back into the store. Push
//! events from the live channel are merged as they arrive.
//!
//! ## Key Invariants
//!
//! - The server is authoritative; local edits win only until a conflict
//! - An entity's operations are applied in the order they were queued
//! - At most one pass runs at a time
//! - Applying a server response is idempotent

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod engine;
mod error;
mod http;
pub mod live;
mod repository;
mod scheduler;

pub use config::{RetryConfig, SyncConfig};
pub use connectivity::{ConnectivityEdge, ConnectivityMonitor, RecoveryTarget};
pub use engine::{PassOutcome, SyncEngine, SyncPassResult, SyncStats, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpFailure, HttpMethod, HttpRemote, HttpRequest, HttpResponse};
pub use live::{apply_live_event, merge_event, ChannelState, LiveChannel, LiveStats, MergeOutcome};
pub use repository::{RefreshSummary, Repository, DEFAULT_PAGE_SIZE};
pub use scheduler::{PassRunner, Scheduler, TokioScheduler};
