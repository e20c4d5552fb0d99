//! `recordindex inspect`: decode one record file without touching a database.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use recordindex_core::{decode, EventExtractor, StreamFileData, StreamFileSummary};

pub async fn run(file: &Path, events: bool) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let decoded = decode(&StreamFileData::new(name, bytes))
        .with_context(|| format!("decoding {}", file.display()))?;
    let report = json!({
        "file": StreamFileSummary::from(&decoded),
        "hash_valid": decoded.hash.eq_ignore_ascii_case(&decoded.computed_hash),
        "computed_hash": decoded.computed_hash,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if events {
        for event in EventExtractor::default().extract_file(&decoded) {
            println!("{}", serde_json::to_string(&event)?);
        }
    }
    Ok(())
}
