//! Verify command implementation.

use super::store::Store;

/// Verification result of one directory generation.
#[derive(Debug)]
pub struct VerifyResult {
    /// Directory file name.
    pub file: String,
    /// Number of entries checked.
    pub entries_checked: usize,
    /// Number of entries that decoded.
    pub valid_entries: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(store: &Store) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {}", store.path.display());
    println!();

    let results = verify(store);
    if results.is_empty() {
        println!("No directory generation found (this may be normal for new stores)");
    }
    for result in &results {
        print_result(result);
    }

    println!();
    if results.iter().all(VerifyResult::is_ok) {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every directory generation and every entry it references.
pub fn verify(store: &Store) -> Vec<VerifyResult> {
    store
        .dir_files
        .generations()
        .iter()
        .rev()
        .map(|&generation| {
            let mut result = VerifyResult {
                file: store.dir_files.file_name(generation),
                entries_checked: 0,
                valid_entries: 0,
                errors: Vec::new(),
            };
            match store.load(generation) {
                Ok(loaded) => {
                    for decoded in loaded.entries() {
                        result.entries_checked += 1;
                        match decoded.result {
                            Ok(_) => result.valid_entries += 1,
                            Err(e) => result.errors.push(format!(
                                "#{} at offset {}: {e}",
                                decoded.id, decoded.offset
                            )),
                        }
                    }
                }
                Err(e) => result.errors.push(e),
            }
            result
        })
        .collect()
}

fn print_result(result: &VerifyResult) {
    println!("{}:", result.file);
    println!("  Entries checked: {}", result.entries_checked);
    println!("  Valid entries:   {}", result.valid_entries);
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in result.errors.iter().take(10) {
            println!("    - {error}");
        }
        if result.errors.len() > 10 {
            println!("    ... and {} more", result.errors.len() - 10);
        }
    }
}
