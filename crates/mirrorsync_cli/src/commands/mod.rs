//! CLI command implementations.

pub mod clear_pending;
pub mod compact;
pub mod dump_queue;
pub mod inspect;
pub mod list;
pub mod verify;

use mirrorsync_core::{Config, Context};
use std::path::Path;

/// Opens an existing store without creating one.
pub fn open_existing(path: &Path) -> Result<Context, Box<dyn std::error::Error>> {
    let config = Config::new().create_if_missing(false);
    Context::open_with_config(path, config)
        .map_err(|e| format!("Cannot open store at {}: {e}", path.display()).into())
}
