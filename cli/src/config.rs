//! Configuration file for the `recordindex` binary.
//!
//! ```json
//! {
//!   "ingest": { "batch_size": 500, "filter": { "exclude": [{ "kinds": ["live_hash"] }] } },
//!   "log":    { "level": "info", "json": false }
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use recordindex_core::IngestConfig;

use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub ingest: IngestConfig,
    pub log: LogConfig,
}

impl CliConfig {
    /// Read `path`, or fall back to defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
