//! Dump command implementation.

use super::store::Store;
use resdb_codec::LogEntry;
use serde::Serialize;

/// One dumped entry.
#[derive(Debug, Serialize)]
pub struct DumpEntry {
    /// Offset in the data log.
    pub offset: u64,
    /// Encoded length.
    pub len: usize,
    /// Decoded entry.
    pub entry: LogEntry,
}

/// Runs the dump command.
pub fn run(
    store: &Store,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (selected, failures) = store.select();
    for (file, reason) in &failures {
        tracing::warn!(%file, %reason, "skipping invalid directory generation");
    }
    let Some(generation) = selected else {
        return Err("No valid directory generation".into());
    };

    let limit = limit.unwrap_or(usize::MAX);
    let mut dumped = Vec::new();
    let mut broken = 0usize;
    for decoded in generation.entries().into_iter().take(limit) {
        match decoded.result {
            Ok((entry, len)) => dumped.push(DumpEntry {
                offset: decoded.offset,
                len,
                entry,
            }),
            Err(e) => {
                broken += 1;
                tracing::warn!(id = decoded.id, offset = decoded.offset, error = %e, "undecodable entry");
            }
        }
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&dumped)?),
        _ => {
            println!(
                "{} -> {} ({} entries)",
                generation.file,
                generation.directory.data_file,
                generation.directory.len()
            );
            println!();
            for item in &dumped {
                print_entry(item);
            }
            if broken > 0 {
                println!();
                println!("{broken} entries could not be decoded");
            }
        }
    }
    Ok(())
}

fn print_entry(item: &DumpEntry) {
    let entry = &item.entry;
    let mut line = format!(
        "{:>10} {:>5}  #{:<6} {} : {} [{}]",
        item.offset, item.len, entry.resource_id, entry.path, entry.type_name, entry.type_key
    );
    if entry.flags.is_reference() {
        line.push_str(&format!(" -> #{}", entry.ref_id));
    }
    if let Some(owner) = &entry.owner {
        line.push_str(&format!(" owner={owner}"));
    }
    if entry.flags.is_active() {
        line.push_str(" active");
    }
    if let Some(value) = &entry.value {
        line.push_str(&format!(" = {value:?}"));
    }
    println!("{line}");
}
