//! Registry-facing types: ids, subjects, fetched schemas and their errors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Registry-assigned id of one schema version.
///
/// Ids are global across subjects and grow with every registration, so the
/// highest id cached for a subject is also its newest version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(pub u32);

impl SchemaId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Format reported in the registry's `schemaType` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    #[default]
    Avro,
    Json,
    Protobuf,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avro => "AVRO",
            Self::Json => "JSON",
            Self::Protobuf => "PROTOBUF",
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaType {
    type Err = SchemaRegistryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        [Self::Avro, Self::Json, Self::Protobuf]
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(raw))
            .ok_or_else(|| SchemaRegistryError::InvalidSchemaType(raw.to_string()))
    }
}

/// Schema text fetched from the registry, tagged with its id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub id: SchemaId,
    pub schema_type: SchemaType,
    pub schema: String,
}

impl Schema {
    pub fn new(id: SchemaId, schema_type: SchemaType, schema: impl Into<String>) -> Self {
        Self {
            id,
            schema_type,
            schema: schema.into(),
        }
    }

    pub fn avro(id: u32, schema: impl Into<String>) -> Self {
        Self::new(SchemaId(id), SchemaType::Avro, schema)
    }
}

/// Registry subject; record values of topic `t` live under `t-value`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject(pub String);

impl Subject {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn value(topic: &str) -> Self {
        Self(format!("{topic}-value"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failures talking to, or interpreting answers from, the schema source
#[derive(Debug, Error)]
pub enum SchemaRegistryError {
    /// No schema with the requested id (registry code 40403)
    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    /// Registry code 40401
    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    /// Registry code 40402
    #[error("Version not found: {0}")]
    VersionNotFound(String),

    #[error("Unsupported schema type: {0}")]
    InvalidSchemaType(String),

    /// Connection failure, timeout, or an unexpected status
    #[error("Registry request failed: {0}")]
    NetworkError(String),

    #[error("Malformed registry response: {0}")]
    SerializationError(String),

    #[error("Registry client configuration: {0}")]
    ConfigError(String),
}

impl From<reqwest::Error> for SchemaRegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::SerializationError(err.to_string());
        }
        Self::NetworkError(err.to_string())
    }
}

impl From<serde_json::Error> for SchemaRegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

pub type SchemaRegistryResult<T> = Result<T, SchemaRegistryError>;
