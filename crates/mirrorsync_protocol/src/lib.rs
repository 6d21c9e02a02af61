//! # MirrorSync Protocol
//!
//! Shared vocabulary of the MirrorSync workspace.
//!
//! This crate provides:
//! - [`Entity`] and [`EntityId`], including temporary-id generation
//! - [`PendingOperation`] and [`OperationKind`] for the outbound queue
//! - [`LiveEvent`] parsing and the push authorization frame
//! - the [`RemoteApi`] trait and its [`RemoteError`] taxonomy
//! - the [`PushConnector`] / [`PushConnection`] traits for live updates
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod messages;
mod operation;
mod push;
mod remote;

pub use entity::{Entity, EntityId, TEMP_ID_PREFIX};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{authorization_frame, LiveEvent, LiveEventKind};
pub use operation::{OperationKind, PendingOperation};
pub use push::{PushConnection, PushConnector, PushError};
pub use remote::{ListQuery, Page, RemoteApi, RemoteError, RemoteResult};
