//! External Schema Registry client (Confluent-compatible)
//!
//! Read-only: the sidecar resolves schemas by id and by subject, it never
//! registers them.

use crate::config::SchemaRegistryConfig;
use crate::schema::types::{
    Schema, SchemaId, SchemaRegistryError, SchemaRegistryResult, SchemaType, Subject,
};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

const REGISTRY_CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

/// Where schemas come from
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Fetch one specific schema version by its global id
    async fn get_by_id(&self, id: SchemaId) -> SchemaRegistryResult<Schema>;

    /// Fetch the latest schema registered under a subject
    async fn get_latest(&self, subject: &Subject) -> SchemaRegistryResult<Schema>;
}

/// Body of both `/schemas/ids/{id}` and `/subjects/{s}/versions/{v}`;
/// only the latter carries the id
#[derive(Debug, Deserialize)]
struct SchemaPayload {
    #[serde(default)]
    id: Option<u32>,
    schema: String,
    #[serde(rename = "schemaType", default)]
    schema_type: Option<String>,
}

/// Confluent-compatible registry reached over HTTP
pub struct ExternalRegistry {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl ExternalRegistry {
    pub fn new(config: &SchemaRegistryConfig) -> SchemaRegistryResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SchemaRegistryError::ConfigError(e.to_string()))?;

        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            (None, None) => None,
            _ => {
                return Err(SchemaRegistryError::ConfigError(
                    "username and password must be set together".into(),
                ))
            }
        };

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch(&self, path: &str) -> SchemaRegistryResult<SchemaPayload> {
        let mut request = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header(ACCEPT, REGISTRY_CONTENT_TYPE);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error(status, &body));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl SchemaSource for ExternalRegistry {
    async fn get_by_id(&self, id: SchemaId) -> SchemaRegistryResult<Schema> {
        let payload = self.fetch(&format!("/schemas/ids/{id}")).await?;
        let schema_type = parse_schema_type(payload.schema_type.as_deref())?;

        info!(schema_id = %id, "Fetched schema");
        Ok(Schema::new(id, schema_type, payload.schema))
    }

    async fn get_latest(&self, subject: &Subject) -> SchemaRegistryResult<Schema> {
        let payload = self
            .fetch(&format!("/subjects/{subject}/versions/latest"))
            .await?;
        let schema_type = parse_schema_type(payload.schema_type.as_deref())?;
        let id = payload.id.map(SchemaId).ok_or_else(|| {
            SchemaRegistryError::SerializationError(format!(
                "latest version of {subject} carries no id"
            ))
        })?;

        info!(subject = %subject, schema_id = %id, "Fetched latest schema");
        Ok(Schema::new(id, schema_type, payload.schema))
    }
}

/// Registries omit `schemaType` for Avro schemas
fn parse_schema_type(raw: Option<&str>) -> SchemaRegistryResult<SchemaType> {
    raw.map_or(Ok(SchemaType::Avro), str::parse::<SchemaType>)
}

/// Map an error response onto the registry's `error_code` values
fn parse_error(status: StatusCode, body: &str) -> SchemaRegistryError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error_code: Option<u32>,
        message: Option<String>,
    }

    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        return SchemaRegistryError::NetworkError(format!("{status}: {body}"));
    };

    let message = parsed.message.unwrap_or_else(|| body.to_string());
    match parsed.error_code {
        Some(40401) => SchemaRegistryError::SubjectNotFound(message),
        Some(40402) => SchemaRegistryError::VersionNotFound(message),
        Some(40403) => SchemaRegistryError::SchemaNotFound(message),
        _ => SchemaRegistryError::NetworkError(format!("{status}: {message}")),
    }
}
