//! Hash-chain verification.
//!
//! Two checks, in order:
//!
//! 1. **Continuity**: the file's declared previous hash equals the hash of
//!    the last accepted file. Skipped when nothing has been accepted yet.
//!    Files named at or before `bypass_until` only log a warning.
//! 2. **Integrity**: the declared self-hash equals the hash recomputed from
//!    the file's bytes. Never bypassed.

use tracing::warn;

use crate::error::HashMismatchError;
use crate::stream::StreamFile;

#[derive(Debug, Clone, Default)]
pub struct HashChainVerifier {
    bypass_until: Option<String>,
}

impl HashChainVerifier {
    pub fn new(bypass_until: Option<String>) -> Self {
        Self { bypass_until }
    }

    /// Check `file` against the hash of the last accepted file.
    pub fn verify(&self, file: &StreamFile, last_hash: Option<&str>) -> Result<(), HashMismatchError> {
        if let Some(expected) = last_hash {
            if !expected.eq_ignore_ascii_case(&file.previous_hash) {
                if self.is_bypassed(&file.name) {
                    warn!(
                        file = %file.name,
                        expected,
                        actual = %file.previous_hash,
                        "Previous hash mismatch tolerated by bypass setting"
                    );
                } else {
                    return Err(HashMismatchError::PreviousHash {
                        file: file.name.clone(),
                        expected: expected.to_string(),
                        actual: file.previous_hash.clone(),
                    });
                }
            }
        }

        if !file.hash.eq_ignore_ascii_case(&file.computed_hash) {
            return Err(HashMismatchError::SelfHash {
                file: file.name.clone(),
                declared: file.hash.clone(),
                computed: file.computed_hash.clone(),
            });
        }
        Ok(())
    }

    fn is_bypassed(&self, name: &str) -> bool {
        self.bypass_until
            .as_deref()
            .is_some_and(|until| name <= until)
    }
}
