//! Inspect command implementation.

use super::store::{format_size, Store};
use serde::Serialize;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory.
    pub path: String,
    /// Directory generation files present.
    pub directory_files: Vec<String>,
    /// Data log generation files present.
    pub data_files: Vec<String>,
    /// Directory that boot would select.
    pub selected_directory: Option<String>,
    /// Data log the selected directory points into.
    pub data_file: Option<String>,
    /// Resources in the selected directory.
    pub entries: usize,
    /// Size of the data log in bytes.
    pub log_size: u64,
    /// Bytes of the log referenced by the directory.
    pub live_bytes: u64,
    /// Bytes of the log not referenced by the directory.
    pub garbage_bytes: u64,
    /// Newer directory generations that failed validation.
    pub rejected: Vec<String>,
}

/// Runs the inspect command.
pub fn run(store: &Store, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(store);
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Summarizes `store`.
pub fn inspect(store: &Store) -> InspectResult {
    let files = |set: &resdb_core::FileGenerationSet| {
        set.generations()
            .iter()
            .map(|&g| set.file_name(g))
            .collect::<Vec<_>>()
    };
    let (selected, failures) = store.select();
    let mut result = InspectResult {
        path: store.path.display().to_string(),
        directory_files: files(&store.dir_files),
        data_files: files(&store.data_files),
        selected_directory: None,
        data_file: None,
        entries: 0,
        log_size: 0,
        live_bytes: 0,
        garbage_bytes: 0,
        rejected: failures
            .into_iter()
            .map(|(file, reason)| format!("{file}: {reason}"))
            .collect(),
    };

    if let Some(generation) = selected {
        result.log_size = generation.log.len() as u64;
        result.live_bytes = generation
            .entries()
            .iter()
            .filter_map(|decoded| decoded.result.as_ref().ok())
            .map(|(_, len)| *len as u64)
            .sum();
        result.garbage_bytes = result.log_size.saturating_sub(result.live_bytes);
        result.entries = generation.directory.len();
        result.data_file = Some(generation.directory.data_file.clone());
        result.selected_directory = Some(generation.file);
    }
    result
}

fn print_text_output(result: &InspectResult) {
    println!("ResDB Store Inspection");
    println!("======================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Generations:");
    println!("  Directory: {}", result.directory_files.join(", "));
    println!("  Data:      {}", result.data_files.join(", "));
    println!();
    match (&result.selected_directory, &result.data_file) {
        (Some(directory), Some(data)) => {
            println!("Selected:");
            println!("  Directory: {directory}");
            println!("  Data file: {data}");
            println!("  Entries:   {}", result.entries);
            println!();
            println!("Log:");
            println!("  Size:      {}", format_size(result.log_size));
            println!("  Live:      {}", format_size(result.live_bytes));
            println!("  Garbage:   {}", format_size(result.garbage_bytes));
        }
        _ => println!("No valid directory generation; the store opens empty."),
    }
    if !result.rejected.is_empty() {
        println!();
        println!("Rejected:");
        for reason in &result.rejected {
            println!("  {reason}");
        }
    }
}
