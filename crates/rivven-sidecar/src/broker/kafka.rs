//! Kafka adapter
//!
//! One `StreamConsumer` per input topic under the shared consumer group,
//! with auto-commit disabled, and one `FutureProducer` for every outbound
//! topic.

use super::{
    Broker, BrokerError, BrokerResult, InboundRecord, OutboundRecord, RecordProducer, TopicReader,
};
use crate::config::BrokerConfig;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Build a broker reading every configured topic
pub fn connect(config: &BrokerConfig) -> BrokerResult<Broker> {
    let readers = config
        .topics
        .iter()
        .map(|topic| {
            KafkaReader::new(config, topic).map(|r| Arc::new(r) as Arc<dyn TopicReader>)
        })
        .collect::<BrokerResult<Vec<_>>>()?;
    let producer = Arc::new(KafkaProducer::new(config)?);

    info!(
        brokers = %config.bootstrap_servers.join(","),
        group = %config.consumer_group,
        topics = ?config.topics,
        "Connected to Kafka"
    );

    Ok(Broker::new(readers, producer))
}

fn base_config(config: &BrokerConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", config.bootstrap_servers.join(","));
    client
}

/// Consumer for one topic
pub struct KafkaReader {
    topic: String,
    consumer: Arc<StreamConsumer>,
}

impl KafkaReader {
    pub fn new(config: &BrokerConfig, topic: &str) -> BrokerResult<Self> {
        let consumer: StreamConsumer = base_config(config)
            .set("group.id", &config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", config.start_offset.as_str())
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .create()
            .map_err(|e| BrokerError::Config(format!("consumer for '{}': {}", topic, e)))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Config(format!("subscribe to '{}': {}", topic, e)))?;

        Ok(Self {
            topic: topic.to_string(),
            consumer: Arc::new(consumer),
        })
    }

    fn fetch_error(&self, err: KafkaError) -> BrokerError {
        BrokerError::Fetch {
            topic: self.topic.clone(),
            message: err.to_string(),
        }
    }
}

fn to_inbound(message: &BorrowedMessage<'_>) -> InboundRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| {
                    let value = h.value.map(Bytes::copy_from_slice).unwrap_or_default();
                    (h.key.to_string(), value)
                })
                .collect()
        })
        .unwrap_or_default();

    let timestamp = message
        .timestamp()
        .to_millis()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    InboundRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(Bytes::copy_from_slice).unwrap_or_default(),
        value: message
            .payload()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default(),
        headers,
        timestamp,
    }
}

#[async_trait]
impl TopicReader for KafkaReader {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn fetch(&self) -> BrokerResult<InboundRecord> {
        let message = self.consumer.recv().await.map_err(|e| self.fetch_error(e))?;
        Ok(to_inbound(&message))
    }

    async fn commit(&self, record: &InboundRecord) -> BrokerResult<()> {
        let commit_error = |message: String| BrokerError::Commit {
            topic: record.topic.clone(),
            message,
        };

        // the committed position is the next offset to read
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| commit_error(e.to_string()))?;

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| commit_error(e.to_string()))?
            .map_err(|e| commit_error(e.to_string()))
    }

    async fn close(&self) -> BrokerResult<()> {
        self.consumer.unsubscribe();
        debug!(topic = %self.topic, "Consumer unsubscribed");
        Ok(())
    }
}

/// Shared producer for all outbound topics
pub struct KafkaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaProducer {
    pub fn new(config: &BrokerConfig) -> BrokerResult<Self> {
        let producer: FutureProducer = base_config(config)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()
            .map_err(|e| BrokerError::Config(format!("producer: {}", e)))?;

        Ok(Self {
            producer,
            timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }
}

#[async_trait]
impl RecordProducer for KafkaProducer {
    async fn send(&self, record: OutboundRecord) -> BrokerResult<()> {
        let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
        for (key, value) in &record.headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            });
        }

        let future_record = FutureRecord::to(&record.topic)
            .key(record.key.as_str())
            .payload(record.value.as_slice())
            .headers(headers);

        self.producer
            .send(future_record, Timeout::After(self.timeout))
            .await
            .map(|_| ())
            .map_err(|(e, _)| BrokerError::Send {
                topic: record.topic.clone(),
                message: e.to_string(),
            })
    }

    async fn close(&self) -> BrokerResult<()> {
        let producer = self.producer.clone();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| BrokerError::Close(e.to_string()))?
            .map_err(|e| BrokerError::Close(format!("producer flush: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StartOffset;

    fn config() -> BrokerConfig {
        BrokerConfig {
            bootstrap_servers: vec!["localhost:9092".into(), "localhost:9093".into()],
            topics: vec!["orders".into(), "payments".into()],
            consumer_group: "sidecar".into(),
            start_offset: StartOffset::Latest,
            ..Default::default()
        }
    }

    #[test]
    fn test_base_config_joins_brokers() {
        let client = base_config(&config());
        assert_eq!(
            client.get("bootstrap.servers"),
            Some("localhost:9092,localhost:9093")
        );
    }

    // client creation does not contact the brokers
    #[tokio::test]
    async fn test_connect_creates_reader_per_topic() {
        let broker = connect(&config()).unwrap();
        assert_eq!(broker.topics(), vec!["orders", "payments"]);
    }
}
