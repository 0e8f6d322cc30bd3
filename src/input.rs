use std::path::Path;

use anyhow::{Context, Result};

/// Read the source URL column from a CSV file with a header row.
pub fn read_profile_links(path: &Path, column: &str) -> Result<Vec<String>> {
    let reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open input list {:?}", path))?;
    read_column(reader, column).with_context(|| format!("Failed to read input list {:?}", path))
}

fn read_column<R: std::io::Read>(mut reader: csv::Reader<R>, column: &str) -> Result<Vec<String>> {
    let idx = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| anyhow::anyhow!("column '{}' not found in header", column))?;

    let mut urls = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(cell) = record.get(idx).map(str::trim).filter(|c| !c.is_empty()) {
            urls.push(cell.to_string());
        }
    }
    Ok(urls)
}
