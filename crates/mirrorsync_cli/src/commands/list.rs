//! List command implementation.

use super::open_existing;
use mirrorsync_core::EntityFilter;
use serde_json::Value;
use std::path::Path;

/// Runs the list command.
pub fn run(
    path: &Path,
    dirty_only: bool,
    search: Option<String>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = open_existing(path)?;

    let mut filter = EntityFilter::new();
    if dirty_only {
        filter = filter.needs_sync(true);
    }
    if let Some(text) = search {
        filter = filter.text(text);
    }
    let entities = ctx.store().list(&filter);

    if format == "json" {
        let rows: Vec<Value> = entities
            .iter()
            .map(|e| {
                let mut row = e.to_wire();
                if let Value::Object(map) = &mut row {
                    map.insert("needsSync".into(), Value::Bool(e.needs_sync));
                }
                row
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{:<40} {:>8} {:<6} {:<12} NAME", "ID", "VERSION", "SYNC", "OWNER");
    println!("{}", "-".repeat(80));
    for entity in &entities {
        let name = entity
            .field("name")
            .and_then(Value::as_str)
            .unwrap_or("-");
        println!(
            "{:<40} {:>8} {:<6} {:<12} {}",
            entity.id,
            entity.version,
            if entity.needs_sync { "dirty" } else { "clean" },
            entity.owner.as_deref().unwrap_or("-"),
            name
        );
    }
    println!();
    println!("{} entities", entities.len());
    Ok(())
}
