//! Remote invoker: the synchronous call to the business endpoint

use crate::config::RemoteConfig;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Remote invoker errors
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for InvokeError {
    fn from(err: reqwest::Error) -> Self {
        InvokeError::Transport(err.to_string())
    }
}

pub type InvokeResult<T> = Result<T, InvokeError>;

/// Envelope posted to the business endpoint for every consumed record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub topic: String,
    pub headers: BTreeMap<String, String>,
    pub key: String,
    pub value: serde_json::Value,
    /// Unix milliseconds
    pub timestamp: i64,
    pub offset: i64,
}

#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    /// Call the endpoint; returns the raw response body
    async fn invoke(&self, request: &InvokeRequest) -> InvokeResult<Bytes>;
}

/// JSON-over-HTTP invoker
pub struct HttpInvoker {
    client: Client,
    url: String,
}

impl HttpInvoker {
    pub fn new(config: &RemoteConfig) -> InvokeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| InvokeError::Config(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl RemoteInvoker for HttpInvoker {
    async fn invoke(&self, request: &InvokeRequest) -> InvokeResult<Bytes> {
        let response = self.client.post(&self.url).json(request).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(InvokeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxumStatus, routing::post, Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/process", addr)
    }

    fn request() -> InvokeRequest {
        InvokeRequest {
            topic: "orders".into(),
            headers: BTreeMap::new(),
            key: "1".into(),
            value: json!({"id": "1", "amount": 5}),
            timestamp: 1_700_000_000_000,
            offset: 42,
        }
    }

    fn invoker(url: String) -> HttpInvoker {
        HttpInvoker::new(&RemoteConfig {
            url,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_envelope_shape() {
        let encoded = serde_json::to_value(request()).unwrap();
        assert_eq!(
            encoded,
            json!({
                "topic": "orders",
                "headers": {},
                "key": "1",
                "value": {"id": "1", "amount": 5},
                "timestamp": 1_700_000_000_000i64,
                "offset": 42
            })
        );
    }

    #[tokio::test]
    async fn test_invoke_echoes_body() {
        let router = Router::new().route(
            "/process",
            post(|Json(req): Json<InvokeRequest>| async move {
                Json(json!([{"topic": format!("{}-done", req.topic), "key": req.key}]))
            }),
        );
        let invoker = invoker(serve(router).await);

        let body = invoker.invoke(&request()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed, json!([{"topic": "orders-done", "key": "1"}]));
    }

    #[tokio::test]
    async fn test_non_200_is_error() {
        let router = Router::new().route(
            "/process",
            post(|| async { (AxumStatus::CREATED, "created") }),
        );
        let invoker = invoker(serve(router).await);

        let err = invoker.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, InvokeError::Status { status: 201, .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let err = invoker(url).invoke(&request()).await.unwrap_err();
        assert!(matches!(err, InvokeError::Transport(_)));
    }
}
