//! Schema cache with lazy expiry
//!
//! Entries are keyed by subject and schema id. Each entry carries a deadline
//! of fetch time plus the refresh interval; an expired entry counts as a miss
//! and is fetched again. Resolution, including the fetch on a miss, runs under
//! one lock, so two callers never fetch the same schema concurrently.

use super::avro::{AvroCodec, AvroSchema};
use super::codec::CodecResult;
use super::external::SchemaSource;
use super::prune::FieldTree;
use super::types::{Schema, SchemaId, SchemaRegistryError, SchemaType, Subject};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// A compiled schema version
#[derive(Debug)]
pub struct CachedSchema {
    pub id: SchemaId,
    pub subject: Subject,
    pub fields: FieldTree,
    pub codec: AvroCodec,
    deadline: Instant,
}

impl CachedSchema {
    fn compile(subject: &Subject, schema: Schema, deadline: Instant) -> CodecResult<Self> {
        if schema.schema_type != SchemaType::Avro {
            return Err(SchemaRegistryError::InvalidSchemaType(format!(
                "{} (schema {} for {})",
                schema.schema_type, schema.id, subject
            ))
            .into());
        }

        let parsed = AvroSchema::parse(&schema.schema)?;
        Ok(Self {
            id: schema.id,
            subject: subject.clone(),
            fields: FieldTree::from_schema(&parsed),
            codec: AvroCodec::new(parsed),
            deadline,
        })
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

type Versions = BTreeMap<SchemaId, Arc<CachedSchema>>;

/// Subject -> schema id -> compiled schema
pub struct SchemaCache {
    source: Arc<dyn SchemaSource>,
    refresh_interval: Duration,
    entries: Mutex<HashMap<Subject, Versions>>,
}

impl SchemaCache {
    pub fn new(source: Arc<dyn SchemaSource>, refresh_interval: Duration) -> Self {
        Self {
            source,
            refresh_interval,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Resolve a schema for `subject`.
    ///
    /// With an id, that exact version is returned. Without one, the highest
    /// unexpired cached id wins, falling back to the registry's latest.
    /// Failed fetches are not cached.
    pub async fn resolve(
        &self,
        subject: &Subject,
        id: Option<SchemaId>,
    ) -> CodecResult<Arc<CachedSchema>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        if let Some(versions) = entries.get(subject) {
            let hit = match id {
                Some(id) => versions.get(&id).filter(|c| !c.is_expired(now)),
                None => versions.values().rev().find(|c| !c.is_expired(now)),
            };
            if let Some(cached) = hit {
                return Ok(Arc::clone(cached));
            }
        }

        debug!(subject = %subject, schema_id = ?id.map(|i| i.0), "Schema cache miss");

        let schema = match id {
            Some(id) => self.source.get_by_id(id).await?,
            None => self.source.get_latest(subject).await?,
        };

        let fetched_at = Instant::now();
        let cached = Arc::new(CachedSchema::compile(
            subject,
            schema,
            fetched_at + self.refresh_interval,
        )?);

        let versions = entries.entry(subject.clone()).or_default();
        versions.retain(|_, c| !c.is_expired(fetched_at));
        versions.insert(cached.id, Arc::clone(&cached));

        Ok(cached)
    }

    /// Number of cached versions for a subject, expired ones included
    pub async fn cached_versions(&self, subject: &Subject) -> usize {
        self.entries
            .lock()
            .await
            .get(subject)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}
