//! Identity types for records tracked by the recency cache

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// A record snapshot: the field values of a record at mutation time.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Name of an entity type (a table, collection or model in the host store).
///
/// Entity types namespace every recency entry, so lookups for one type
/// never observe entries written for another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for EntityType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for EntityType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Opaque, comparable record identifier.
///
/// Integer keys and string keys are kept distinct: `RecordId::Int(7)` never
/// equals `RecordId::Text("7")`. UUIDs are carried as their hyphenated text
/// form so an identifier survives a JSON round trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Stable textual encoding used inside cache keys.
    ///
    /// The two variants encode differently (`i:42` vs `s:42`) so they can
    /// never collide on the same key.
    pub fn key_fragment(&self) -> String {
        match self {
            Self::Int(n) => format!("i:{}", n),
            Self::Text(s) => format!("s:{}", s),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for RecordId {
    fn from(n: i32) -> Self {
        Self::Int(n as i64)
    }
}

impl From<u32> for RecordId {
    fn from(n: u32) -> Self {
        Self::Int(n as i64)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        Self::Text(id.hyphenated().to_string())
    }
}
