//! Ingestion settings.

use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::event::EventKind;
use crate::filter::{FilterConfig, IngestionFilter};
use crate::retry::RetryConfig;

/// Top-level pipeline configuration. Every field has a default, so `{}` is
/// a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Events per kind buffered before a flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Files named at or before this skip the previous-hash check.
    #[serde(default)]
    pub bypass_hash_mismatch_until: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub persist: PersistConfig,
}

fn default_batch_size() -> usize {
    2_000
}

fn bool_true() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            bypass_hash_mismatch_until: None,
            retry: RetryConfig::default(),
            filter: FilterConfig::default(),
            persist: PersistConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_json(json: &str) -> Result<Self, IngestError> {
        serde_json::from_str(json).map_err(|e| IngestError::Config(e.to_string()))
    }

    /// Checks numeric settings and compiles the filter.
    pub fn validate(&self) -> Result<IngestionFilter, IngestError> {
        if self.batch_size == 0 {
            return Err(IngestError::Config("batch_size must be greater than zero".into()));
        }
        self.retry.validate().map_err(IngestError::Config)?;
        Ok(self.filter.compile()?)
    }
}

/// Switches for whole families of events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistConfig {
    /// Contract results and logs.
    #[serde(default = "bool_true")]
    pub contracts: bool,
    #[serde(default = "bool_true")]
    pub contract_state_changes: bool,
    /// File contents.
    #[serde(default = "bool_true")]
    pub files: bool,
    /// Topic messages.
    #[serde(default = "bool_true")]
    pub topics: bool,
    #[serde(default = "bool_true")]
    pub non_fee_transfers: bool,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            contracts: true,
            contract_state_changes: true,
            files: true,
            topics: true,
            non_fee_transfers: true,
        }
    }
}

impl PersistConfig {
    pub fn allows(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::ContractResult | EventKind::ContractLog => self.contracts,
            EventKind::ContractStateChange => self.contract_state_changes,
            EventKind::FileData => self.files,
            EventKind::TopicMessage => self.topics,
            EventKind::NonFeeTransfer => self.non_fee_transfers,
            EventKind::Transaction
            | EventKind::EntityUpsert
            | EventKind::Transfer
            | EventKind::LiveHash => true,
        }
    }
}
