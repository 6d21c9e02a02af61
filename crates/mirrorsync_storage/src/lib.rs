//! # MirrorSync Storage
//!
//! Byte-store backends for the MirrorSync journal.
//!
//! A backend is an **opaque append-only byte store**. It knows nothing about
//! entities, pending operations or the journal framing; `mirrorsync_core`
//! owns all interpretation of the bytes.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and ephemeral mirrors
//! - [`FileBackend`] - durable mirrors backed by a single OS file
//!
//! ## Example
//!
//! ```rust
//! use mirrorsync_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"batch").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"batch");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
