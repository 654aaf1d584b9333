//! Core types for the schema registry
//!
//! - [`SchemaId`], [`Subject`], [`SchemaVersion`] - identifiers
//! - [`Schema`], [`SubjectVersion`] - schema data structures
//! - [`CompatibilityLevel`] - evolution policy

use serde::{Deserialize, Serialize};

/// Schema serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SchemaType {
    /// Apache Avro (recommended for production)
    #[default]
    #[serde(alias = "avro", alias = "AVRO")]
    Avro,

    /// JSON Schema
    #[serde(alias = "json", alias = "JSON")]
    Json,

    /// Protocol Buffers
    #[serde(alias = "protobuf", alias = "PROTOBUF")]
    Protobuf,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Avro => "AVRO",
            SchemaType::Json => "JSON",
            SchemaType::Protobuf => "PROTOBUF",
        }
    }
}

impl std::fmt::Display for SchemaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SchemaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AVRO" => Ok(SchemaType::Avro),
            "JSON" => Ok(SchemaType::Json),
            "PROTOBUF" => Ok(SchemaType::Protobuf),
            _ => Err(format!("Unknown schema type: {}", s)),
        }
    }
}

/// Unique identifier for a schema (global across all subjects).
///
/// Content-addressed: byte-identical content of the same type always
/// resolves to the same id, no matter which subject registered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaId(pub u32);

impl SchemaId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SchemaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SchemaId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Subject (typically topic-name + "-key" or "-value").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject(pub String);

impl Subject {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Subject {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Subject {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Version number within a subject.
///
/// Strictly increasing from 1 per subject; a retired number is never
/// reassigned, even after the subject is deleted and re-registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaVersion(pub u32);

impl SchemaVersion {
    /// The special "latest" version marker
    pub const LATEST: u32 = u32::MAX;

    pub fn new(version: u32) -> Self {
        Self(version)
    }

    pub fn latest() -> Self {
        Self(Self::LATEST)
    }

    pub fn is_latest(&self) -> bool {
        self.0 == Self::LATEST
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_latest() {
            write!(f, "latest")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u32> for SchemaVersion {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl std::str::FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(SchemaVersion::latest());
        }
        s.parse::<u32>()
            .map(SchemaVersion::new)
            .map_err(|_| format!("Invalid version: {}", s))
    }
}

/// A registered schema. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Unique schema ID (global)
    pub id: SchemaId,
    /// Schema format
    pub schema_type: SchemaType,
    /// The schema definition
    pub schema: String,
    /// Content fingerprint used for deduplication
    pub fingerprint: String,
}

impl Schema {
    pub fn new(
        id: SchemaId,
        schema_type: SchemaType,
        schema: String,
        fingerprint: String,
    ) -> Self {
        Self {
            id,
            schema_type,
            schema,
            fingerprint,
        }
    }
}

/// The binding of a subject + version number to a schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectVersion {
    pub subject: Subject,
    pub version: SchemaVersion,
    pub id: SchemaId,
    pub schema_type: SchemaType,
    pub schema: String,
}

/// Compatibility level for schema evolution.
///
/// | Level | Description |
/// |-------|-------------|
/// | BACKWARD | New schema can read old data (default) |
/// | FORWARD | Old schema can read new data |
/// | FULL | Both directions |
/// | NONE | No checking |
///
/// `*_TRANSITIVE` variants check against every prior live version instead
/// of only the latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityLevel {
    /// New schema can read data written by the old schema (default)
    #[default]
    Backward,
    BackwardTransitive,
    /// Old schema can read data written by the new schema
    Forward,
    ForwardTransitive,
    /// Both backward and forward compatible
    Full,
    FullTransitive,
    /// No compatibility checking
    None,
}

impl CompatibilityLevel {
    pub fn is_backward(&self) -> bool {
        matches!(
            self,
            Self::Backward | Self::BackwardTransitive | Self::Full | Self::FullTransitive
        )
    }

    pub fn is_forward(&self) -> bool {
        matches!(
            self,
            Self::Forward | Self::ForwardTransitive | Self::Full | Self::FullTransitive
        )
    }

    pub fn is_transitive(&self) -> bool {
        matches!(
            self,
            Self::BackwardTransitive | Self::ForwardTransitive | Self::FullTransitive
        )
    }
}

impl std::fmt::Display for CompatibilityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Backward => "BACKWARD",
            Self::BackwardTransitive => "BACKWARD_TRANSITIVE",
            Self::Forward => "FORWARD",
            Self::ForwardTransitive => "FORWARD_TRANSITIVE",
            Self::Full => "FULL",
            Self::FullTransitive => "FULL_TRANSITIVE",
            Self::None => "NONE",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for CompatibilityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BACKWARD" => Ok(Self::Backward),
            "BACKWARD_TRANSITIVE" => Ok(Self::BackwardTransitive),
            "FORWARD" => Ok(Self::Forward),
            "FORWARD_TRANSITIVE" => Ok(Self::ForwardTransitive),
            "FULL" => Ok(Self::Full),
            "FULL_TRANSITIVE" => Ok(Self::FullTransitive),
            "NONE" => Ok(Self::None),
            _ => Err(format!("Unknown compatibility level: {}", s)),
        }
    }
}
