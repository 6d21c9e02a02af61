//! Live updates pushed by the server.
//!
//! A [`LiveChannel`] keeps one push connection open per session. A reader
//! task hands inbound frames to a merge task through a bounded channel;
//! when the buffer is full the reader blocks, so frames are never dropped.
//! Each frame is merged with [`merge_event`] in its own write.

mod channel;
mod merge;

pub use channel::{ChannelState, LiveChannel, LiveStats};
pub use merge::{apply_live_event, merge_event, MergeOutcome};
