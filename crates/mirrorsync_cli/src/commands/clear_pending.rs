//! Clear-pending command implementation.

use super::open_existing;
use mirrorsync_sync_engine::Repository;
use std::path::Path;
use std::sync::Arc;

/// Runs the clear-pending command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Arc::new(open_existing(path)?);
    let repo = Repository::new(ctx);
    let dropped = repo.clear_pending()?;
    println!("Dropped {dropped} pending operations");
    Ok(())
}
