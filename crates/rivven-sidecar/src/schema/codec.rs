//! Wire-format codec for broker values
//!
//! Values on the broker use the Confluent wire format:
//!
//! ```text
//! [0x00][schema_id: 4 bytes big-endian][avro body]
//! ```
//!
//! Encoding always targets the latest schema of the topic's value subject.
//! Decoding resolves the exact schema id found in the header, which may be
//! an older version than the latest.

use super::avro::AvroError;
use super::cache::SchemaCache;
use super::types::{SchemaId, SchemaRegistryError, Subject};
use thiserror::Error;

/// Magic byte that opens every wire value
pub const MAGIC_BYTE: u8 = 0x00;

/// Magic byte plus schema id
pub const HEADER_LEN: usize = 5;

/// Errors that can occur during codec operations
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Schema registry error: {0}")]
    Registry(#[from] SchemaRegistryError),

    #[error("Avro error: {0}")]
    Avro(#[from] AvroError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Short payload: expected at least {HEADER_LEN} bytes, got {0}")]
    ShortPayload(usize),

    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),
}

impl CodecError {
    /// Whether the failure came from talking to the schema source
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CodecError::Registry(
                SchemaRegistryError::NetworkError(_)
                    | SchemaRegistryError::SchemaNotFound(_)
                    | SchemaRegistryError::SubjectNotFound(_)
                    | SchemaRegistryError::VersionNotFound(_)
            )
        )
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Encode the wire header for a schema ID
pub fn encode_schema_id_header(schema_id: SchemaId) -> [u8; HEADER_LEN] {
    let id = schema_id.0.to_be_bytes();
    [MAGIC_BYTE, id[0], id[1], id[2], id[3]]
}

/// Split a wire value into its schema id and body
pub fn decode_schema_id_header(bytes: &[u8]) -> CodecResult<(SchemaId, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::ShortPayload(bytes.len()));
    }
    if bytes[0] != MAGIC_BYTE {
        return Err(CodecError::InvalidWireFormat(format!(
            "Invalid magic byte: expected {}, got {}",
            MAGIC_BYTE, bytes[0]
        )));
    }

    let id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((SchemaId::new(id), &bytes[HEADER_LEN..]))
}

/// Converts JSON values to and from wire bytes for a topic
pub struct SchemaCodec {
    cache: SchemaCache,
}

impl SchemaCodec {
    pub fn new(cache: SchemaCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Encode `value` against the latest value schema of `topic`.
    ///
    /// Object keys unknown to the schema are pruned first.
    pub async fn encode(&self, topic: &str, value: &serde_json::Value) -> CodecResult<Vec<u8>> {
        let subject = Subject::value(topic);
        let cached = self.cache.resolve(&subject, None).await?;

        let pruned = cached.fields.pruned(value);
        let body = cached.codec.encode(&pruned)?;

        let mut result = Vec::with_capacity(HEADER_LEN + body.len());
        result.extend_from_slice(&encode_schema_id_header(cached.id));
        result.extend_from_slice(&body);
        Ok(result)
    }

    /// Decode a wire value read from `topic`
    pub async fn decode(&self, topic: &str, bytes: &[u8]) -> CodecResult<serde_json::Value> {
        let (schema_id, body) = decode_schema_id_header(bytes)?;

        let subject = Subject::value(topic);
        let cached = self.cache.resolve(&subject, Some(schema_id)).await?;

        Ok(cached.codec.decode(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::cache::tests::StaticSource;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const ORDER_SCHEMA: &str = r#"{
        "type": "record",
        "name": "Order",
        "fields": [
            {"name": "id", "type": "string"},
            {"name": "amount", "type": "long"}
        ]
    }"#;

    fn codec(source: Arc<StaticSource>) -> SchemaCodec {
        SchemaCodec::new(SchemaCache::new(source, Duration::from_secs(10)))
    }

    #[test]
    fn test_schema_id_header() {
        let header = encode_schema_id_header(SchemaId::new(258));
        assert_eq!(header, [0, 0, 0, 1, 2]);

        let (id, body) = decode_schema_id_header(&[0, 0, 0, 1, 2, 9]).unwrap();
        assert_eq!(id, SchemaId::new(258));
        assert_eq!(body, &[9]);
    }

    #[test]
    fn test_short_payload() {
        for len in 0..HEADER_LEN {
            let bytes = vec![0u8; len];
            assert!(matches!(
                decode_schema_id_header(&bytes),
                Err(CodecError::ShortPayload(n)) if n == len
            ));
        }
    }

    #[test]
    fn test_bad_magic_byte() {
        let err = decode_schema_id_header(&[1, 0, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidWireFormat(_)));
    }

    #[tokio::test]
    async fn test_round_trip() {
        let source = Arc::new(StaticSource::new().with_schema("orders-value", 3, ORDER_SCHEMA));
        let codec = codec(source);
        let value = json!({"id": "1", "amount": 5});

        let bytes = codec.encode("orders", &value).await.unwrap();
        assert_eq!(bytes[0], MAGIC_BYTE);
        assert_eq!(&bytes[1..5], &3u32.to_be_bytes());

        assert_eq!(codec.decode("orders", &bytes).await.unwrap(), value);
    }

    #[tokio::test]
    async fn test_extra_keys_encode_identically() {
        let source = Arc::new(StaticSource::new().with_schema("orders-value", 3, ORDER_SCHEMA));
        let codec = codec(source);

        let plain = codec
            .encode("orders", &json!({"id": "1", "amount": 5}))
            .await
            .unwrap();
        let extra = codec
            .encode(
                "orders",
                &json!({"id": "1", "amount": 5, "extraUnknownKey": {"x": 1}}),
            )
            .await
            .unwrap();

        assert_eq!(plain, extra);
    }

    #[tokio::test]
    async fn test_decode_historical_version() {
        let old = r#"{"type": "record", "name": "Order", "fields": [{"name": "id", "type": "string"}]}"#;
        let source = Arc::new(
            StaticSource::new()
                .with_schema("orders-value", 1, old)
                .with_schema("orders-value", 2, ORDER_SCHEMA),
        );
        let codec = codec(source.clone());

        // body of {"id": "7"} under schema 1: zigzag length 1 then "7"
        let bytes = [0, 0, 0, 0, 1, 2, b'7'];
        assert_eq!(
            codec.decode("orders", &bytes).await.unwrap(),
            json!({"id": "7"})
        );
        assert_eq!(source.fetches_by_id(), 1);
    }

    #[tokio::test]
    async fn test_registry_failure_is_surfaced() {
        let source = Arc::new(StaticSource::new());
        let codec = codec(source);

        let err = codec
            .encode("unknown", &json!({"id": "1"}))
            .await
            .unwrap_err();
        assert!(err.is_transport());

        let err = codec.decode("unknown", &[0, 0, 0, 0, 9]).await.unwrap_err();
        assert!(matches!(err, CodecError::Registry(_)));
    }

    #[tokio::test]
    async fn test_conversion_error_is_format() {
        let source = Arc::new(StaticSource::new().with_schema("orders-value", 3, ORDER_SCHEMA));
        let codec = codec(source);

        let err = codec
            .encode("orders", &json!({"id": "1", "amount": "five"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::Avro(_)));
        assert!(!err.is_transport());
    }
}
