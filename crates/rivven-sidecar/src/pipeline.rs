//! Pipeline orchestrator
//!
//! Two drivers run concurrently, each only when its source is configured:
//!
//! ```text
//! broker:  listen → decode → invoke → parse response → send() → commit
//! ingress: listen → parse body → send()
//! ```
//!
//! `send()` is shared by both drivers. It checks every request against the
//! allow-list, encodes the whole batch, and only then publishes the records
//! in order.
//!
//! Failure policy: on the broker path a failure stops the pipeline only when
//! `terminate_on_error` is set, otherwise the record is left uncommitted and
//! the driver moves on. A batch failure on the ingress path always stops the
//! pipeline. Fatal errors are returned from [`Pipeline::run`].

use crate::broker::{InboundRecord, MessageListener, MessageSender, OutboundRecord};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::health::{Driver, DriverHealth, DriverStatus, SharedHealthState};
use crate::ingress::IngressListener;
use crate::invoker::{InvokeRequest, RemoteInvoker};
use crate::schema::SchemaCodec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Header naming the input topic a published record was derived from
pub const PROCESSED_TOPIC_HEADER: &str = "processed_topic";

/// One record to publish, as returned by the business endpoint or posted
/// to the ingress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub topic: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub key: String,
    /// Plain JSON, encoded against the latest schema of `topic`
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Parse a batch body; `null` is an empty batch
pub fn parse_batch(body: &[u8]) -> Result<Vec<SendRequest>, serde_json::Error> {
    serde_json::from_slice::<Option<Vec<SendRequest>>>(body).map(Option::unwrap_or_default)
}

/// Everything the broker driver needs besides the shared sender
struct BrokerSource {
    listener: Arc<dyn MessageListener>,
    invoker: Arc<dyn RemoteInvoker>,
}

/// The orchestrator
pub struct Pipeline {
    codec: Arc<SchemaCodec>,
    sender: Arc<dyn MessageSender>,
    source: Option<BrokerSource>,
    ingress: Option<Arc<dyn IngressListener>>,
    config: PipelineConfig,
    allowed_topics: HashSet<String>,
    health: SharedHealthState,
}

impl Pipeline {
    pub fn new(
        codec: Arc<SchemaCodec>,
        sender: Arc<dyn MessageSender>,
        config: PipelineConfig,
        health: SharedHealthState,
    ) -> Self {
        let allowed_topics = config.allowed_topics.iter().cloned().collect();
        Self {
            codec,
            sender,
            source: None,
            ingress: None,
            config,
            allowed_topics,
            health,
        }
    }

    /// Enable the broker driver
    pub fn with_broker(
        mut self,
        listener: Arc<dyn MessageListener>,
        invoker: Arc<dyn RemoteInvoker>,
    ) -> Self {
        self.source = Some(BrokerSource { listener, invoker });
        self
    }

    /// Enable the ingress driver
    pub fn with_ingress(mut self, ingress: Arc<dyn IngressListener>) -> Self {
        self.ingress = Some(ingress);
        self
    }

    pub fn health(&self) -> &SharedHealthState {
        &self.health
    }

    /// Run both drivers until `cancel` fires, their sources end, or one of
    /// them fails fatally.
    ///
    /// A fatal failure cancels the other driver before returning.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), PipelineError> {
        {
            let mut health = self.health.write().await;
            health.broker = DriverHealth::new(self.source.is_some());
            health.ingress = DriverHealth::new(self.ingress.is_some());
        }

        let cancel = cancel.child_token();
        let broker = async {
            let result = self.run_broker(cancel.clone()).await;
            if result.is_err() {
                cancel.cancel();
            }
            result
        };
        let ingress = async {
            let result = self.run_ingress(cancel.clone()).await;
            if result.is_err() {
                cancel.cancel();
            }
            result
        };

        let (broker, ingress) = tokio::join!(broker, ingress);
        broker.and(ingress)
    }

    async fn run_broker(&self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let Some(source) = &self.source else {
            return Ok(());
        };

        let result = self.broker_loop(source, cancel).await;
        self.finish(Driver::Broker, &result).await;
        result
    }

    async fn broker_loop(
        &self,
        source: &BrokerSource,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        let (mut records, mut errors) = source.listener.listen(cancel.clone());
        self.set_status(Driver::Broker, DriverStatus::Running).await;
        info!("Broker driver started");

        let mut errors_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                error = errors.recv(), if errors_open => match error {
                    Some(e) => {
                        let err = PipelineError::Listen(e);
                        if err.is_cancelled() {
                            debug!("Reader reported cancellation");
                            continue;
                        }
                        error!(kind = %err.kind(), error = %err, "Broker listen error");
                        self.apply_broker_policy(err).await?;
                    }
                    None => errors_open = false,
                },
                record = records.recv() => match record {
                    Some(record) => match self.process_record(source, &record).await {
                        Ok(()) => self.record_success(Driver::Broker).await,
                        Err(err) => {
                            error!(
                                topic = %record.topic,
                                partition = record.partition,
                                offset = record.offset,
                                kind = %err.kind(),
                                error = %err,
                                "Record processing failed"
                            );
                            self.apply_broker_policy(err).await?;
                        }
                    },
                    None => {
                        debug!("Record stream closed");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Decode, invoke, publish and commit one consumed record
    async fn process_record(
        &self,
        source: &BrokerSource,
        record: &InboundRecord,
    ) -> Result<(), PipelineError> {
        debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            key = %record.key_str(),
            "Record received"
        );

        let value = self
            .codec
            .decode(&record.topic, &record.value)
            .await
            .map_err(PipelineError::Decode)?;

        let request = InvokeRequest {
            topic: record.topic.clone(),
            headers: record.header_map(),
            key: record.key_str(),
            value,
            timestamp: record.timestamp.timestamp_millis(),
            offset: record.offset,
        };
        let body = source.invoker.invoke(&request).await?;

        let mut batch = parse_batch(&body).map_err(PipelineError::ResponseFormat)?;
        for request in &mut batch {
            request
                .headers
                .insert(PROCESSED_TOPIC_HEADER.to_string(), record.topic.clone());
        }

        self.send(batch).await?;

        if self.config.commit_on_success {
            source
                .listener
                .commit_message(record)
                .await
                .map_err(PipelineError::Commit)?;
            debug!(topic = %record.topic, offset = record.offset, "Record committed");
        }

        Ok(())
    }

    async fn apply_broker_policy(&self, err: PipelineError) -> Result<(), PipelineError> {
        self.record_error(Driver::Broker, &err).await;
        if self.config.terminate_on_error {
            return Err(err);
        }
        Ok(())
    }

    async fn run_ingress(&self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let Some(ingress) = &self.ingress else {
            return Ok(());
        };

        let result = self.ingress_loop(ingress.as_ref(), cancel).await;
        self.finish(Driver::Ingress, &result).await;
        result
    }

    async fn ingress_loop(
        &self,
        ingress: &dyn IngressListener,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        let (mut batches, mut errors) = ingress.listen(cancel.clone()).await?;
        self.set_status(Driver::Ingress, DriverStatus::Running).await;
        info!("Ingress driver started");

        let mut errors_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                error = errors.recv(), if errors_open => match error {
                    Some(e) => {
                        let err = PipelineError::Ingress(e);
                        error!(error = %err, "Ingress listen error");
                        self.record_error(Driver::Ingress, &err).await;
                        if self.config.terminate_on_error {
                            return Err(err);
                        }
                    }
                    None => errors_open = false,
                },
                body = batches.recv() => match body {
                    Some(body) => match self.process_batch(&body).await {
                        Ok(published) => {
                            debug!(published, "Ingress batch published");
                            self.record_success(Driver::Ingress).await;
                        }
                        Err(err) => {
                            error!(kind = %err.kind(), error = %err, "Ingress batch failed");
                            self.record_error(Driver::Ingress, &err).await;
                            return Err(err);
                        }
                    },
                    None => {
                        debug!("Ingress stream closed");
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn process_batch(&self, body: &[u8]) -> Result<usize, PipelineError> {
        let batch = parse_batch(body).map_err(PipelineError::BodyFormat)?;
        self.send(batch).await
    }

    /// Authorize, encode and publish a batch; returns the number published.
    ///
    /// A topic outside the allow-list rejects the whole batch. Every request
    /// is encoded before the first one is published, so an encode failure
    /// publishes nothing. A publish failure leaves earlier records of the
    /// batch published.
    pub async fn send(&self, batch: Vec<SendRequest>) -> Result<usize, PipelineError> {
        if !self.allowed_topics.is_empty() {
            if let Some(denied) = batch
                .iter()
                .find(|r| !self.allowed_topics.contains(&r.topic))
            {
                return Err(PipelineError::Unauthorized {
                    topic: denied.topic.clone(),
                });
            }
        }

        let mut outbound = Vec::with_capacity(batch.len());
        for request in batch {
            let value = match self.codec.encode(&request.topic, &request.value).await {
                Ok(value) => value,
                Err(source) => {
                    debug!(topic = %request.topic, value = %request.value, "Encode rejected value");
                    return Err(PipelineError::Encode {
                        topic: request.topic,
                        source,
                    });
                }
            };

            outbound.push(OutboundRecord {
                topic: request.topic,
                key: request.key,
                value,
                headers: request.headers,
            });
        }

        let published = outbound.len();
        for record in outbound {
            debug!(topic = %record.topic, key = %record.key, "Publishing record");
            self.sender
                .send(record)
                .await
                .map_err(PipelineError::Publish)?;
        }

        Ok(published)
    }

    async fn set_status(&self, driver: Driver, status: DriverStatus) {
        self.health.write().await.driver_mut(driver).status = status;
    }

    async fn record_success(&self, driver: Driver) {
        self.health.write().await.driver_mut(driver).record_success();
    }

    async fn record_error(&self, driver: Driver, err: &PipelineError) {
        self.health.write().await.driver_mut(driver).record_error(err);
    }

    async fn finish(&self, driver: Driver, result: &Result<(), PipelineError>) {
        let status = match result {
            Ok(()) => DriverStatus::Stopped,
            Err(_) => DriverStatus::Failed,
        };
        info!(driver = %driver, status = %status, "Driver finished");
        self.set_status(driver, status).await;
    }
}
