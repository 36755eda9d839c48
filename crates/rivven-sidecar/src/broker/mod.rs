//! Broker fan-in/out
//!
//! One reader per configured topic, all feeding a single record channel and
//! a single error channel, plus one shared producer for outbound records.
//!
//! ```text
//! topic-a reader ──┐
//! topic-b reader ──┼──► records (bounded) ──► orchestrator
//! topic-c reader ──┘    errors  (bounded)
//! ```
//!
//! Each reader runs in its own task and selects between fetching, sending
//! into the shared channel, and cancellation. A supervisor task owns the
//! original channel senders and drops them only after every reader task has
//! finished, so both channels close exactly once, after the last source.

pub mod kafka;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default capacity of the shared record and error channels.
///
/// Kept small so a slow orchestrator throttles every reader.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1;

/// Broker layer errors
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Cancelled")]
    Cancelled,

    #[error("Fetch from topic '{topic}' failed: {message}")]
    Fetch { topic: String, message: String },

    #[error("Commit on topic '{topic}' failed: {message}")]
    Commit { topic: String, message: String },

    #[error("Send to topic '{topic}' failed: {message}")]
    Send { topic: String, message: String },

    #[error("No reader for topic: {0}")]
    UnknownTopic(String),

    #[error("Close failed: {0}")]
    Close(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BrokerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BrokerError::Cancelled)
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// A record consumed from an input topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Bytes,
    /// Wire-format value
    pub value: Bytes,
    /// Headers in broker order
    pub headers: Vec<(String, Bytes)>,
    pub timestamp: DateTime<Utc>,
}

impl InboundRecord {
    /// Headers as a string map; later duplicates win
    pub fn header_map(&self) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
            .collect()
    }

    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// A record to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: String,
    /// Wire-format value
    pub value: Vec<u8>,
    pub headers: BTreeMap<String, String>,
}

/// One topic's consumer under the shared consumer group
#[async_trait]
pub trait TopicReader: Send + Sync + 'static {
    fn topic(&self) -> &str;

    /// Wait for the next record
    async fn fetch(&self) -> BrokerResult<InboundRecord>;

    /// Mark `record` as processed
    async fn commit(&self, record: &InboundRecord) -> BrokerResult<()>;

    async fn close(&self) -> BrokerResult<()>;
}

/// The shared outbound producer
#[async_trait]
pub trait RecordProducer: Send + Sync + 'static {
    async fn send(&self, record: OutboundRecord) -> BrokerResult<()>;

    async fn close(&self) -> BrokerResult<()>;
}

/// Consuming side of the broker, as seen by the orchestrator
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Start consuming every topic until `cancel` fires
    fn listen(
        &self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<InboundRecord>, mpsc::Receiver<BrokerError>);

    async fn commit_message(&self, record: &InboundRecord) -> BrokerResult<()>;
}

/// Producing side of the broker, as seen by the orchestrator
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, record: OutboundRecord) -> BrokerResult<()>;
}

/// Multi-topic consumer with a shared producer
pub struct Broker {
    readers: HashMap<String, Arc<dyn TopicReader>>,
    producer: Arc<dyn RecordProducer>,
    channel_capacity: usize,
}

impl Broker {
    pub fn new(readers: Vec<Arc<dyn TopicReader>>, producer: Arc<dyn RecordProducer>) -> Self {
        let readers = readers
            .into_iter()
            .map(|r| (r.topic().to_string(), r))
            .collect();

        Self {
            readers,
            producer,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.readers.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }

    /// Close every reader, then the producer.
    ///
    /// All of them are closed even when one fails; the first error is returned.
    pub async fn close(&self) -> BrokerResult<()> {
        let mut first_error = None;

        for topic in self.topics() {
            if let Err(e) = self.readers[topic].close().await {
                error!(topic = %topic, error = %e, "Failed to close reader");
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.producer.close().await {
            error!(error = %e, "Failed to close producer");
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Broker closed");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl MessageListener for Broker {
    fn listen(
        &self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<InboundRecord>, mpsc::Receiver<BrokerError>) {
        let (record_tx, record_rx) = mpsc::channel(self.channel_capacity);
        let (error_tx, error_rx) = mpsc::channel(self.channel_capacity);

        let mut tasks = JoinSet::new();
        for reader in self.readers.values() {
            tasks.spawn(fetch_loop(
                Arc::clone(reader),
                record_tx.clone(),
                error_tx.clone(),
                cancel.clone(),
            ));
        }

        info!(topics = ?self.topics(), "Listening");

        tokio::spawn(async move {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "Reader task failed");
                }
            }
            debug!("All readers stopped, closing channels");
            drop(record_tx);
            drop(error_tx);
        });

        (record_rx, error_rx)
    }

    async fn commit_message(&self, record: &InboundRecord) -> BrokerResult<()> {
        let reader = self
            .readers
            .get(&record.topic)
            .ok_or_else(|| BrokerError::UnknownTopic(record.topic.clone()))?;

        reader.commit(record).await?;
        debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            "Committed"
        );
        Ok(())
    }
}

#[async_trait]
impl MessageSender for Broker {
    async fn send(&self, record: OutboundRecord) -> BrokerResult<()> {
        let topic = record.topic.clone();
        self.producer.send(record).await?;
        debug!(topic = %topic, "Published");
        Ok(())
    }
}

async fn fetch_loop(
    reader: Arc<dyn TopicReader>,
    records: mpsc::Sender<InboundRecord>,
    errors: mpsc::Sender<BrokerError>,
    cancel: CancellationToken,
) {
    let topic = reader.topic().to_string();
    debug!(topic = %topic, "Reader started");

    loop {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            fetched = reader.fetch() => fetched,
        };

        let delivered = match fetched {
            Ok(record) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = records.send(record) => sent.is_ok(),
                }
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Fetch failed");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = errors.send(e) => sent.is_ok(),
                }
            }
        };

        if !delivered {
            debug!(topic = %topic, "Consumer side gone, reader stopping");
            return;
        }
    }

    // never blocks past cancellation
    let _ = errors.try_send(BrokerError::Cancelled);
    debug!(topic = %topic, "Reader cancelled");
}
