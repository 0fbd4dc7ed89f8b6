//! Identity types - ULID-backed unique ids

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Id prefixes for the object kinds that carry generated identities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UidPrefix {
    Flow,
    Test,
    Check,
    Item,
    Measure,
    Defect,
}

impl UidPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            UidPrefix::Flow => "FLW",
            UidPrefix::Test => "TST",
            UidPrefix::Check => "CHK",
            UidPrefix::Item => "ITM",
            UidPrefix::Measure => "MEA",
            UidPrefix::Defect => "DEF",
        }
    }
}

/// A unique identifier: prefix plus ULID (e.g. `FLW-01HQ3...`)
///
/// ULIDs are lexicographically sortable by creation time, so id order
/// follows creation order within one process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    /// Generate a fresh id with the given prefix
    pub fn new(prefix: UidPrefix) -> Self {
        Self(format!("{}-{}", prefix.as_str(), Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
