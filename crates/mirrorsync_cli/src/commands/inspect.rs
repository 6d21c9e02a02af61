//! Inspect command implementation.

use super::open_existing;
use mirrorsync_core::{Context, EntityFilter};
use mirrorsync_protocol::OperationKind;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Sequence of the last committed batch.
    pub sequence: u64,
    /// Number of mirrored entities.
    pub entity_count: usize,
    /// Entities carrying unsynced edits.
    pub dirty_count: usize,
    /// Entities still under a temporary id.
    pub temporary_count: usize,
    /// Pending operations by kind.
    pub pending: PendingCounts,
}

/// Pending operations by kind.
#[derive(Debug, Default, Serialize)]
pub struct PendingCounts {
    /// CREATE operations.
    pub create: usize,
    /// UPDATE operations.
    pub update: usize,
    /// DELETE operations.
    pub delete: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = open_existing(path)?;
    let result = inspect(&ctx, path)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Collects store statistics.
pub fn inspect(ctx: &Context, path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let entities = ctx.store().list(&EntityFilter::new());
    let mut pending = PendingCounts::default();
    for op in ctx.queue().all_ordered() {
        match op.kind {
            OperationKind::Create => pending.create += 1,
            OperationKind::Update => pending.update += 1,
            OperationKind::Delete => pending.delete += 1,
        }
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_size: ctx.journal_size()?,
        sequence: ctx.sequence(),
        entity_count: entities.len(),
        dirty_count: entities.iter().filter(|e| e.needs_sync).count(),
        temporary_count: entities.iter().filter(|e| e.id.is_temporary()).count(),
        pending,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("MirrorSync Store: {}", result.path);
    println!();
    println!("Journal:");
    println!("  Size:     {} bytes", result.journal_size);
    println!("  Sequence: {}", result.sequence);
    println!();
    println!("Entities:");
    println!("  Total:     {}", result.entity_count);
    println!("  Unsynced:  {}", result.dirty_count);
    println!("  Temporary: {}", result.temporary_count);
    println!();
    println!("Pending operations:");
    println!("  CREATE: {}", result.pending.create);
    println!("  UPDATE: {}", result.pending.update);
    println!("  DELETE: {}", result.pending.delete);
}
