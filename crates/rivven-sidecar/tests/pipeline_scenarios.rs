//! Pipeline scenarios
//!
//! Runs the orchestrator over the real fan-in broker and codec, with
//! in-memory doubles at the Kafka, registry and business-endpoint seams.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use rivven_sidecar::broker::{
    Broker, BrokerError, BrokerResult, InboundRecord, OutboundRecord, RecordProducer, TopicReader,
};
use rivven_sidecar::config::{IngressConfig, PipelineConfig};
use rivven_sidecar::health::{DriverStatus, HealthState, SharedHealthState};
use rivven_sidecar::ingress::HttpIngress;
use rivven_sidecar::invoker::{InvokeRequest, InvokeResult, RemoteInvoker};
use rivven_sidecar::schema::{
    Schema, SchemaCache, SchemaCodec, SchemaId, SchemaRegistryError, SchemaRegistryResult,
    SchemaSource, Subject,
};
use rivven_sidecar::{ErrorKind, Pipeline, PipelineError};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

const ORDER_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Order",
    "fields": [
        {"name": "id", "type": "string"},
        {"name": "amount", "type": "long"}
    ]
}"#;

const RESULT_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Result",
    "fields": [
        {"name": "id", "type": "string"},
        {"name": "status", "type": "string"}
    ]
}"#;

type EventLog = Arc<Mutex<Vec<String>>>;

/// Registry with one schema per subject; the id is the position in the list
struct MemorySource {
    schemas: Vec<(&'static str, &'static str)>,
}

impl MemorySource {
    fn standard() -> Self {
        Self {
            schemas: vec![
                ("orders-value", ORDER_SCHEMA),
                ("orders-done-value", RESULT_SCHEMA),
                ("a-value", RESULT_SCHEMA),
                ("b-value", RESULT_SCHEMA),
                ("c-value", RESULT_SCHEMA),
            ],
        }
    }
}

#[async_trait]
impl SchemaSource for MemorySource {
    async fn get_by_id(&self, id: SchemaId) -> SchemaRegistryResult<Schema> {
        self.schemas
            .get(id.0 as usize)
            .map(|(_, schema)| Schema::avro(id.0, *schema))
            .ok_or_else(|| SchemaRegistryError::SchemaNotFound(id.to_string()))
    }

    async fn get_latest(&self, subject: &Subject) -> SchemaRegistryResult<Schema> {
        self.schemas
            .iter()
            .position(|(s, _)| *s == subject.as_str())
            .map(|id| Schema::avro(id as u32, self.schemas[id].1))
            .ok_or_else(|| SchemaRegistryError::SubjectNotFound(subject.to_string()))
    }
}

struct LoggingReader {
    topic: String,
    script: Mutex<VecDeque<InboundRecord>>,
    log: EventLog,
    fail_commit: bool,
}

#[async_trait]
impl TopicReader for LoggingReader {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn fetch(&self) -> BrokerResult<InboundRecord> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(record) => Ok(record),
            None => std::future::pending().await,
        }
    }

    async fn commit(&self, record: &InboundRecord) -> BrokerResult<()> {
        if self.fail_commit {
            return Err(BrokerError::Commit {
                topic: record.topic.clone(),
                message: "not coordinator".into(),
            });
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("commit:{}:{}", record.topic, record.offset));
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        Ok(())
    }
}

struct LoggingProducer {
    log: EventLog,
    sent: Mutex<Vec<OutboundRecord>>,
}

#[async_trait]
impl RecordProducer for LoggingProducer {
    async fn send(&self, record: OutboundRecord) -> BrokerResult<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("publish:{}", record.topic));
        self.sent.lock().unwrap().push(record);
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        Ok(())
    }
}

/// Business endpoint returning the same batch for every record
struct StaticEndpoint {
    response: Value,
    requests: Mutex<Vec<Value>>,
}

#[async_trait]
impl RemoteInvoker for StaticEndpoint {
    async fn invoke(&self, request: &InvokeRequest) -> InvokeResult<Bytes> {
        self.requests
            .lock()
            .unwrap()
            .push(serde_json::to_value(request).unwrap());
        Ok(Bytes::from(self.response.to_string()))
    }
}

struct Harness {
    codec: Arc<SchemaCodec>,
    log: EventLog,
    producer: Arc<LoggingProducer>,
    endpoint: Arc<StaticEndpoint>,
    pipeline: Arc<Pipeline>,
}

impl Harness {
    async fn new(
        records: Vec<(i64, Value)>,
        response: Value,
        config: PipelineConfig,
        fail_commit: bool,
    ) -> Self {
        let codec = Arc::new(SchemaCodec::new(SchemaCache::new(
            Arc::new(MemorySource::standard()),
            Duration::from_secs(60),
        )));
        let log: EventLog = Arc::default();

        let mut script = VecDeque::new();
        for (offset, value) in records {
            script.push_back(InboundRecord {
                topic: "orders".into(),
                partition: 0,
                offset,
                key: Bytes::from_static(b"1"),
                value: codec.encode("orders", &value).await.unwrap().into(),
                headers: Vec::new(),
                timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            });
        }

        let reader = Arc::new(LoggingReader {
            topic: "orders".into(),
            script: Mutex::new(script),
            log: log.clone(),
            fail_commit,
        });
        let producer = Arc::new(LoggingProducer {
            log: log.clone(),
            sent: Mutex::new(Vec::new()),
        });
        let broker = Arc::new(Broker::new(
            vec![reader as Arc<dyn TopicReader>],
            producer.clone(),
        ));
        let endpoint = Arc::new(StaticEndpoint {
            response,
            requests: Mutex::new(Vec::new()),
        });

        let health: SharedHealthState = Arc::new(RwLock::new(HealthState::new(true, false)));
        let pipeline = Arc::new(
            Pipeline::new(codec.clone(), broker.clone(), config, health)
                .with_broker(broker, endpoint.clone()),
        );

        Self {
            codec,
            log,
            producer,
            endpoint,
            pipeline,
        }
    }

    fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Run until `done` holds, then cancel
    async fn run_until(&self, done: impl Fn(&Self) -> bool) {
        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let pipeline = self.pipeline.clone();
            let cancel = cancel.clone();
            async move { pipeline.run(cancel).await }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(self) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("pipeline did not reach the expected state");

        cancel.cancel();
        run.await.unwrap().unwrap();
    }

    async fn run_to_error(&self) -> PipelineError {
        tokio::time::timeout(
            Duration::from_secs(5),
            self.pipeline.run(CancellationToken::new()),
        )
        .await
        .expect("pipeline did not stop")
        .unwrap_err()
    }
}

fn order() -> Value {
    json!({"id": "1", "amount": 5})
}

fn result_for(topic: &str) -> Value {
    json!({"topic": topic, "headers": {}, "key": "1", "value": {"id": "1", "status": "ok"}})
}

#[tokio::test]
async fn test_end_to_end_orders() {
    let harness = Harness::new(
        vec![(42, order())],
        json!([result_for("orders-done")]),
        PipelineConfig::default(),
        false,
    )
    .await;

    harness
        .run_until(|h| h.events().iter().any(|e| e.starts_with("commit")))
        .await;

    let requests = harness.endpoint.requests.lock().unwrap().clone();
    assert_eq!(
        requests,
        vec![json!({
            "topic": "orders",
            "headers": {},
            "key": "1",
            "value": {"id": "1", "amount": 5},
            "timestamp": 1_700_000_000_000i64,
            "offset": 42
        })]
    );

    let expected = harness
        .codec
        .encode("orders-done", &json!({"id": "1", "status": "ok"}))
        .await
        .unwrap();
    let sent = harness.producer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "orders-done");
    assert_eq!(sent[0].key, "1");
    assert_eq!(sent[0].headers["processed_topic"], "orders");
    assert_eq!(sent[0].value, expected);

    assert_eq!(harness.events(), vec!["publish:orders-done", "commit:orders:42"]);
}

#[tokio::test]
async fn test_commit_follows_every_publish() {
    let harness = Harness::new(
        vec![(1, order()), (2, order())],
        json!([result_for("a"), result_for("b"), result_for("c")]),
        PipelineConfig::default(),
        false,
    )
    .await;

    harness
        .run_until(|h| h.events().contains(&"commit:orders:2".to_string()))
        .await;

    assert_eq!(
        harness.events(),
        vec![
            "publish:a",
            "publish:b",
            "publish:c",
            "commit:orders:1",
            "publish:a",
            "publish:b",
            "publish:c",
            "commit:orders:2",
        ]
    );
}

#[tokio::test]
async fn test_authorization_rejects_whole_batch() {
    let harness = Harness::new(
        vec![(7, order())],
        json!([result_for("a"), result_for("c")]),
        PipelineConfig {
            allowed_topics: vec!["a".into(), "b".into()],
            ..Default::default()
        },
        false,
    )
    .await;

    let err = harness.run_to_error().await;

    assert!(matches!(err, PipelineError::Unauthorized { ref topic } if topic == "c"));
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert!(harness.events().is_empty());
}

#[tokio::test]
async fn test_commit_disabled_never_commits() {
    let harness = Harness::new(
        vec![(1, order()), (2, order())],
        json!([result_for("orders-done")]),
        PipelineConfig {
            commit_on_success: false,
            ..Default::default()
        },
        false,
    )
    .await;

    harness
        .run_until(|h| h.producer.sent.lock().unwrap().len() == 2)
        .await;

    assert!(harness.events().iter().all(|e| e.starts_with("publish")));
}

#[tokio::test]
async fn test_commit_failure_keeps_publishes() {
    let harness = Harness::new(
        vec![(3, order())],
        json!([result_for("orders-done")]),
        PipelineConfig::default(),
        true,
    )
    .await;

    let err = harness.run_to_error().await;

    assert_eq!(err.kind(), ErrorKind::Commit);
    assert_eq!(harness.events(), vec!["publish:orders-done"]);
    assert_eq!(
        harness.pipeline.health().read().await.broker.status,
        DriverStatus::Failed
    );
}

#[tokio::test]
async fn test_continue_on_error_skips_failed_record() {
    // second record's response targets a topic without a schema
    let harness = Harness::new(
        vec![(1, order()), (2, order())],
        json!([result_for("orders-done"), result_for("unknown")]),
        PipelineConfig {
            terminate_on_error: false,
            ..Default::default()
        },
        false,
    )
    .await;

    harness
        .run_until(|h| {
            h.pipeline
                .health()
                .try_read()
                .map(|state| state.broker.errors_count == 2)
                .unwrap_or(false)
        })
        .await;

    // encoding fails before anything is published, so nothing is committed
    assert!(harness.events().is_empty());
}

#[tokio::test]
async fn test_halt_on_error() {
    let harness = Harness::new(
        vec![(1, order()), (2, order())],
        json!([result_for("unknown")]),
        PipelineConfig::default(),
        false,
    )
    .await;

    let err = harness.run_to_error().await;

    assert!(matches!(err, PipelineError::Encode { ref topic, .. } if topic == "unknown"));
    // the second record is never handed to the endpoint
    assert_eq!(harness.endpoint.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_ingress_batches_over_http() {
    let codec = Arc::new(SchemaCodec::new(SchemaCache::new(
        Arc::new(MemorySource::standard()),
        Duration::from_secs(60),
    )));
    let log: EventLog = Arc::default();
    let producer = Arc::new(LoggingProducer {
        log: log.clone(),
        sent: Mutex::new(Vec::new()),
    });
    let broker = Arc::new(Broker::new(Vec::new(), producer.clone()));

    let ingress = HttpIngress::bind(&IngressConfig {
        port: 0,
        host: "127.0.0.1".into(),
        path: "/".into(),
    })
    .await
    .unwrap();
    let url = format!("http://{}/", ingress.local_addr());

    let health: SharedHealthState = Arc::new(RwLock::new(HealthState::new(false, true)));
    let pipeline = Arc::new(
        Pipeline::new(codec, broker, PipelineConfig::default(), health)
            .with_ingress(Arc::new(ingress)),
    );
    let run = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.run(CancellationToken::new()).await }
    });

    let client = reqwest::Client::new();
    let accepted = client
        .post(&url)
        .json(&json!([result_for("a"), result_for("b")]))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status().as_u16(), 201);

    // a malformed batch stops the pipeline regardless of terminate_on_error
    client.post(&url).body("{not json").send().await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("pipeline did not stop")
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, PipelineError::BodyFormat(_)));
    assert_eq!(err.kind(), ErrorKind::Format);
    assert_eq!(log.lock().unwrap().clone(), vec!["publish:a", "publish:b"]);
}
