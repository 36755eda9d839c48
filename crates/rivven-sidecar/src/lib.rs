//! rivven-sidecar - Kafka sidecar for stateless JSON endpoints
//!
//! The sidecar owns the binary side of a Kafka deployment so the business
//! endpoint only ever sees JSON over a simple request/response call.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  wire   ┌───────────────────────────┐  JSON  ┌────────────┐
//! │ input topics │────────▶│  decode ─▶ invoke         │───────▶│  business  │
//! └──────────────┘         │                           │◀───────│  endpoint  │
//! ┌──────────────┐  wire   │  send(): authorize,       │        └────────────┘
//! │output topics │◀────────│  encode, publish, commit  │
//! └──────────────┘         └───────────────────────────┘
//!                                       ▲ JSON batches
//!                                  HTTP ingress
//! ```
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use rivven_sidecar::{broker, config::SidecarConfig, pipeline::Pipeline, schema};
//!
//! let config = SidecarConfig::from_env()?;
//! let registry = Arc::new(schema::ExternalRegistry::new(&config.schema_registry)?);
//! let codec = Arc::new(schema::SchemaCodec::new(schema::SchemaCache::new(registry, refresh)));
//! let broker = Arc::new(broker::kafka::connect(&config.broker)?);
//!
//! let pipeline = Pipeline::new(codec, broker.clone(), config.pipeline.clone(), health)
//!     .with_broker(broker, invoker);
//! pipeline.run(cancel).await?;
//! ```
//!
//! # CLI Usage (Binary)
//!
//! ```bash
//! # Configuration from the environment
//! KAFKA_TOPICS=orders KAFKA_CONSUMER_GROUP_ID=orders HTTP_ROUTE=http://app/ rivven-sidecar
//!
//! # Configuration from a file
//! rivven-sidecar -c sidecar.yaml
//!
//! # Validate configuration
//! rivven-sidecar -c sidecar.yaml validate
//! ```

// Error types
pub mod error;

pub mod broker;
pub mod config;
pub mod health;
pub mod ingress;
pub mod invoker;
pub mod pipeline;
pub mod schema;

pub use error::{ErrorKind, PipelineError, Result, SidecarError};
pub use pipeline::{Pipeline, SendRequest};
