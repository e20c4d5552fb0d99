//! Record files read from a local directory.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use recordindex_core::entity::EntityId;
use recordindex_core::{IngestError, StreamFileData, StreamFileSource};

pub const EXTENSION: &str = "rcd";

/// `*.rcd` files of one directory in name order.
#[derive(Debug)]
pub struct DirectorySource {
    pending: VecDeque<(String, PathBuf)>,
    node: Option<EntityId>,
}

impl DirectorySource {
    /// List `dir`, keeping files whose names sort after `after`.
    pub fn scan(dir: &Path, after: Option<&str>, node: Option<EntityId>) -> io::Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if after.is_some_and(|after| name.as_str() <= after) {
                continue;
            }
            files.push((name, path));
        }
        files.sort();
        debug!(dir = %dir.display(), files = files.len(), "Scanned record directory");
        Ok(Self {
            pending: files.into(),
            node,
        })
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[async_trait]
impl StreamFileSource for DirectorySource {
    async fn next_file(&mut self) -> Result<Option<StreamFileData>, IngestError> {
        let Some((name, path)) = self.pending.pop_front() else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| IngestError::Source(format!("{}: {e}", path.display())))?;
        let data = StreamFileData::new(name, bytes);
        Ok(Some(match self.node {
            Some(node) => data.with_node(node),
            None => data,
        }))
    }
}
