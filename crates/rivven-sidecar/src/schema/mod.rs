//! Schema resolution and wire-format conversion
//!
//! - [`ExternalRegistry`]: Confluent-compatible registry client behind the
//!   [`SchemaSource`] trait
//! - [`SchemaCache`]: subject/id cache with a refresh interval
//! - [`FieldTree`]: prunes JSON objects to the fields a schema knows
//! - [`SchemaCodec`]: JSON to wire bytes and back
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_sidecar::schema::{ExternalRegistry, SchemaCache, SchemaCodec};
//!
//! let registry = Arc::new(ExternalRegistry::new(&config.schema_registry)?);
//! let cache = SchemaCache::new(registry, Duration::from_secs(300));
//! let codec = SchemaCodec::new(cache);
//!
//! let bytes = codec.encode("orders", &json!({"id": "1", "amount": 5})).await?;
//! let value = codec.decode("orders", &bytes).await?;
//! ```

mod avro;
mod cache;
mod codec;
mod external;
mod prune;
mod types;

pub use avro::{avro_to_json, json_to_avro, AvroCodec, AvroError, AvroResult, AvroSchema};
pub use cache::{CachedSchema, SchemaCache};
pub use codec::{
    decode_schema_id_header, encode_schema_id_header, CodecError, CodecResult, SchemaCodec,
    HEADER_LEN, MAGIC_BYTE,
};
pub use external::{ExternalRegistry, SchemaSource};
pub use prune::{FieldNode, FieldTree, Shape, UnionBranch};
pub use types::{Schema, SchemaId, SchemaRegistryError, SchemaRegistryResult, SchemaType, Subject};

#[cfg(test)]
pub(crate) use cache::tests::StaticSource;
