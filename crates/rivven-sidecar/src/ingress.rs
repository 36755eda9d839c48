//! Ingress listener: externally submitted batches over HTTP
//!
//! `POST <path>` with a JSON array of send requests. The body is handed to
//! the ingress driver as raw bytes; the response is `201 Created` once the
//! driver has accepted the batch, or `503` when the driver is gone.

use crate::config::IngressConfig;
use async_trait::async_trait;
use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Ingress errors
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("Failed to bind {addr}: {message}")]
    Bind { addr: String, message: String },

    #[error("Server error: {0}")]
    Server(String),

    #[error("Ingress is already listening")]
    AlreadyListening,
}

pub type IngressResult<T> = Result<T, IngressError>;

/// Source of externally submitted batches
#[async_trait]
pub trait IngressListener: Send + Sync {
    /// Start accepting batches until `cancel` fires
    async fn listen(
        &self,
        cancel: CancellationToken,
    ) -> IngressResult<(mpsc::Receiver<Bytes>, mpsc::Receiver<IngressError>)>;
}

/// HTTP ingress backed by axum
pub struct HttpIngress {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    path: String,
}

impl HttpIngress {
    /// Bind the configured address without serving yet
    pub async fn bind(config: &IngressConfig) -> IngressResult<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| IngressError::Bind {
                addr: addr.clone(),
                message: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| IngressError::Bind {
            addr,
            message: e.to_string(),
        })?;

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            path: config.path.clone(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn accept_batch(State(batches): State<mpsc::Sender<Bytes>>, body: Bytes) -> StatusCode {
    debug!(bytes = body.len(), "Batch received");
    match batches.send(body).await {
        Ok(()) => StatusCode::CREATED,
        Err(_) => {
            warn!("Ingress driver stopped, rejecting batch");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[async_trait]
impl IngressListener for HttpIngress {
    async fn listen(
        &self,
        cancel: CancellationToken,
    ) -> IngressResult<(mpsc::Receiver<Bytes>, mpsc::Receiver<IngressError>)> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or(IngressError::AlreadyListening)?;

        let (batch_tx, batch_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);

        let app = Router::new()
            .route(&self.path, post(accept_batch))
            .layer(TraceLayer::new_for_http())
            .with_state(batch_tx);

        info!(addr = %self.local_addr, path = %self.path, "Ingress listening");

        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await;
            if let Err(e) = served {
                let _ = error_tx.send(IngressError::Server(e.to_string())).await;
            }
            debug!("Ingress stopped");
        });

        Ok((batch_rx, error_rx))
    }
}
