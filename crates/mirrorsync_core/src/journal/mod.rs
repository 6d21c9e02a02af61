//! Append-only journal backing the local mirror.
//!
//! Every write transaction becomes exactly one record, so a batch is either
//! fully replayed or not at all.
//!
//! ## Record Format
//!
//! ```text
//! | magic "MSJL" (4) | version (2) | length (4) | CBOR batch (N) | crc32 (4) |
//! ```
//!
//! The CRC covers everything before it. The CBOR payload is a [`Batch`]:
//! a commit sequence, the allocation counters and a list of [`Mutation`]s.
//!
//! ## Recovery Policy
//!
//! - A truncated or checksum-failing **final** record is a torn write from
//!   a crash; it is discarded and the file truncated to the valid prefix.
//! - Bad magic, an unknown version, or a checksum failure followed by more
//!   records is corruption and the context refuses to open.

mod record;
mod writer;

pub use record::{
    compute_crc32, scan, Batch, Counters, JournalScan, Mutation, TailDamage, JOURNAL_MAGIC,
    JOURNAL_VERSION,
};
pub use writer::{verify, Journal};
