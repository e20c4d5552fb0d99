//! Entity identities: the `shard.realm.num` address of every ledger object.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EntityIdError;
use crate::proto;

const SHARD_BITS: u32 = 15;
const REALM_BITS: u32 = 16;
const NUM_BITS: u32 = 32;

/// Largest shard that packs into an encoded id.
pub const MAX_SHARD: i64 = (1 << SHARD_BITS) - 1;
/// Largest realm that packs into an encoded id.
pub const MAX_REALM: i64 = (1 << REALM_BITS) - 1;
/// Largest entity number that packs into an encoded id.
pub const MAX_NUM: i64 = (1 << NUM_BITS) - 1;

/// A `(shard, realm, num)` triple.
///
/// Packs losslessly into a non-negative `i64` (15/16/32 bits) for storage.
/// Components are validated on construction, so every `EntityId` value has
/// exactly one encoding and [`EntityId::decode`] is its inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    shard: i64,
    realm: i64,
    num: i64,
}

impl EntityId {
    pub fn new(shard: i64, realm: i64, num: i64) -> Result<Self, EntityIdError> {
        check("shard", shard, MAX_SHARD)?;
        check("realm", realm, MAX_REALM)?;
        check("num", num, MAX_NUM)?;
        Ok(Self { shard, realm, num })
    }

    /// Shorthand for `0.0.num`.
    pub fn of_num(num: i64) -> Result<Self, EntityIdError> {
        Self::new(0, 0, num)
    }

    pub fn shard(&self) -> i64 {
        self.shard
    }

    pub fn realm(&self) -> i64 {
        self.realm
    }

    pub fn num(&self) -> i64 {
        self.num
    }

    /// Pack into the storage representation.
    pub fn encode(&self) -> i64 {
        (self.shard << (REALM_BITS + NUM_BITS)) | (self.realm << NUM_BITS) | self.num
    }

    /// Unpack a storage id produced by [`encode`](Self::encode).
    pub fn decode(encoded: i64) -> Result<Self, EntityIdError> {
        if encoded < 0 {
            return Err(EntityIdError::OutOfRange {
                component: "encoded id",
                value: encoded,
                max: i64::MAX,
            });
        }
        Self::new(
            encoded >> (REALM_BITS + NUM_BITS),
            (encoded >> NUM_BITS) & MAX_REALM,
            encoded & MAX_NUM,
        )
    }

    /// Converts a wire id; `None` for an absent or all-zero id.
    pub fn from_proto(id: Option<&proto::EntityNum>) -> Option<Result<Self, EntityIdError>> {
        let id = id?;
        if id.shard == 0 && id.realm == 0 && id.num == 0 {
            return None;
        }
        Some(Self::new(id.shard, id.realm, id.num))
    }

    pub fn to_proto(&self) -> proto::EntityNum {
        proto::EntityNum {
            shard: self.shard,
            realm: self.realm,
            num: self.num,
        }
    }
}

fn check(component: &'static str, value: i64, max: i64) -> Result<(), EntityIdError> {
    if (0..=max).contains(&value) {
        Ok(())
    } else {
        Err(EntityIdError::OutOfRange {
            component,
            value,
            max,
        })
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        let [shard, realm, num] = parts.as_slice() else {
            return Err(EntityIdError::Parse(s.to_string()));
        };
        let parse = |p: &str| p.parse::<i64>().map_err(|_| EntityIdError::Parse(s.to_string()));
        Self::new(parse(*shard)?, parse(*realm)?, parse(*num)?)
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.to_string()
    }
}

/// Kind of addressable ledger object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Account,
    Contract,
    File,
    Topic,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Contract => "contract",
            Self::File => "file",
            Self::Topic => "topic",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" => Ok(Self::Account),
            "contract" => Ok(Self::Contract),
            "file" => Ok(Self::File),
            "topic" => Ok(Self::Topic),
            other => Err(EntityIdError::Parse(other.to_string())),
        }
    }
}
