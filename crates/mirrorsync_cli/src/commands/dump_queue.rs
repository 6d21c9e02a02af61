//! Dump queue command implementation.

use super::open_existing;
use mirrorsync_core::Context;
use serde::Serialize;
use std::path::Path;

/// Pending operation representation for output.
#[derive(Debug, Serialize)]
pub struct OperationInfo {
    /// Local operation id.
    pub id: u64,
    /// Send order.
    pub sequence: u64,
    /// CREATE, UPDATE or DELETE.
    pub kind: String,
    /// Target entity.
    pub entity_id: String,
    /// Unix millis of the latest enqueue.
    pub enqueued_at: u64,
    /// Whether the target row still exists locally.
    pub target_present: bool,
}

/// Runs the dump-queue command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = open_existing(path)?;
    let ops = collect(&ctx, limit);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&ops)?),
        _ => print_text_output(&ops),
    }
    Ok(())
}

/// Returns queued operations in FIFO order.
pub fn collect(ctx: &Context, limit: Option<usize>) -> Vec<OperationInfo> {
    let store = ctx.store();
    ctx.queue()
        .all_ordered()
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|op| OperationInfo {
            id: op.id,
            sequence: op.sequence,
            kind: op.kind.to_string(),
            target_present: store.get(&op.entity_id).is_some(),
            entity_id: op.entity_id.to_string(),
            enqueued_at: op.enqueued_at,
        })
        .collect()
}

fn print_text_output(ops: &[OperationInfo]) {
    println!("{:>6} {:>8} {:<7} {:<40} TARGET", "ID", "SEQ", "KIND", "ENTITY");
    println!("{}", "-".repeat(72));
    for op in ops {
        println!(
            "{:>6} {:>8} {:<7} {:<40} {}",
            op.id,
            op.sequence,
            op.kind,
            op.entity_id,
            if op.target_present { "present" } else { "gone" }
        );
    }
    println!();
    println!("{} operations", ops.len());
}
