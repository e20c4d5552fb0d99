//! Shared types for the ingestion pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::proto::transaction_body::Data;

// ─── TransactionType ─────────────────────────────────────────────────────────

/// Functional type of a ledger transaction.
///
/// The numeric code equals the body's `data` oneof tag, so types this
/// pipeline has no mapping for still carry their code as `Unknown(code)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransactionType {
    ContractCall,
    ContractCreate,
    ContractUpdate,
    CryptoAddLiveHash,
    CryptoCreateAccount,
    CryptoDelete,
    CryptoDeleteLiveHash,
    CryptoTransfer,
    CryptoUpdateAccount,
    FileAppend,
    FileCreate,
    FileDelete,
    FileUpdate,
    ContractDelete,
    ConsensusCreateTopic,
    ConsensusUpdateTopic,
    ConsensusDeleteTopic,
    ConsensusSubmitMessage,
    /// A body whose payload tag is not declared here (`-1` when the body is empty).
    Unknown(i32),
}

const NAMED: &[(TransactionType, i32, &str)] = &[
    (TransactionType::ContractCall, 7, "CONTRACTCALL"),
    (TransactionType::ContractCreate, 8, "CONTRACTCREATEINSTANCE"),
    (TransactionType::ContractUpdate, 9, "CONTRACTUPDATEINSTANCE"),
    (TransactionType::CryptoAddLiveHash, 10, "CRYPTOADDLIVEHASH"),
    (TransactionType::CryptoCreateAccount, 11, "CRYPTOCREATEACCOUNT"),
    (TransactionType::CryptoDelete, 12, "CRYPTODELETE"),
    (TransactionType::CryptoDeleteLiveHash, 13, "CRYPTODELETELIVEHASH"),
    (TransactionType::CryptoTransfer, 14, "CRYPTOTRANSFER"),
    (TransactionType::CryptoUpdateAccount, 15, "CRYPTOUPDATEACCOUNT"),
    (TransactionType::FileAppend, 16, "FILEAPPEND"),
    (TransactionType::FileCreate, 17, "FILECREATE"),
    (TransactionType::FileDelete, 18, "FILEDELETE"),
    (TransactionType::FileUpdate, 19, "FILEUPDATE"),
    (TransactionType::ContractDelete, 22, "CONTRACTDELETEINSTANCE"),
    (TransactionType::ConsensusCreateTopic, 24, "CONSENSUSCREATETOPIC"),
    (TransactionType::ConsensusUpdateTopic, 25, "CONSENSUSUPDATETOPIC"),
    (TransactionType::ConsensusDeleteTopic, 26, "CONSENSUSDELETETOPIC"),
    (TransactionType::ConsensusSubmitMessage, 27, "CONSENSUSSUBMITMESSAGE"),
];

impl TransactionType {
    pub fn from_data(data: &Data) -> Self {
        match data {
            Data::ContractCall(_) => Self::ContractCall,
            Data::ContractCreateInstance(_) => Self::ContractCreate,
            Data::ContractUpdateInstance(_) => Self::ContractUpdate,
            Data::CryptoAddLiveHash(_) => Self::CryptoAddLiveHash,
            Data::CryptoCreateAccount(_) => Self::CryptoCreateAccount,
            Data::CryptoDelete(_) => Self::CryptoDelete,
            Data::CryptoDeleteLiveHash(_) => Self::CryptoDeleteLiveHash,
            Data::CryptoTransfer(_) => Self::CryptoTransfer,
            Data::CryptoUpdateAccount(_) => Self::CryptoUpdateAccount,
            Data::FileAppend(_) => Self::FileAppend,
            Data::FileCreate(_) => Self::FileCreate,
            Data::FileDelete(_) => Self::FileDelete,
            Data::FileUpdate(_) => Self::FileUpdate,
            Data::ContractDeleteInstance(_) => Self::ContractDelete,
            Data::ConsensusCreateTopic(_) => Self::ConsensusCreateTopic,
            Data::ConsensusUpdateTopic(_) => Self::ConsensusUpdateTopic,
            Data::ConsensusDeleteTopic(_) => Self::ConsensusDeleteTopic,
            Data::ConsensusSubmitMessage(_) => Self::ConsensusSubmitMessage,
        }
    }

    pub fn from_code(code: i32) -> Self {
        NAMED
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(t, _, _)| *t)
            .unwrap_or(Self::Unknown(code))
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Unknown(code) => *code,
            known => NAMED
                .iter()
                .find(|(t, _, _)| t == known)
                .map(|(_, c, _)| *c)
                .unwrap_or(-1),
        }
    }

    pub fn name(&self) -> &'static str {
        NAMED
            .iter()
            .find(|(t, _, _)| t == self)
            .map(|(_, _, n)| *n)
            .unwrap_or("UNKNOWN")
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "UNKNOWN({code})"),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    /// Accepts the upper-case name (`CRYPTOTRANSFER`) or the numeric code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        if let Some((t, _, _)) = NAMED.iter().find(|(_, _, n)| *n == upper) {
            return Ok(*t);
        }
        upper
            .parse::<i32>()
            .map(Self::from_code)
            .map_err(|_| s.to_string())
    }
}

impl TryFrom<String> for TransactionType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Known types serialize by name, unknown ones by bare code so they parse back.
impl From<TransactionType> for String {
    fn from(t: TransactionType) -> Self {
        match t {
            TransactionType::Unknown(code) => code.to_string(),
            known => known.name().to_string(),
        }
    }
}

// ─── HapiVersion ─────────────────────────────────────────────────────────────

/// Ledger API version that produced a record file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HapiVersion {
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
}

impl HapiVersion {
    pub fn new(major: i32, minor: i32, patch: i32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for HapiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
