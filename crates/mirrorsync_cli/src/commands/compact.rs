//! Compact command implementation.

use super::open_existing;
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = open_existing(path)?;

    println!("Compacting journal at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
        println!();
        println!("  Journal size: {} bytes", ctx.journal_size()?);
        println!("  Entities:     {}", ctx.store().len());
        println!("  Pending ops:  {}", ctx.queue().len());
        return Ok(());
    }
    println!();

    let stats = ctx.compact()?;
    let saved = stats.before.saturating_sub(stats.after);
    println!("  Size before: {} bytes", stats.before);
    println!("  Size after:  {} bytes", stats.after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        saved,
        if stats.before > 0 {
            (saved as f64 / stats.before as f64) * 100.0
        } else {
            0.0
        }
    );
    Ok(())
}
