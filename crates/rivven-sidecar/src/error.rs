//! Error types for rivven-sidecar
//!
//! Every subsystem owns its own error enum. [`PipelineError`] wraps them per
//! orchestrator stage and classifies each failure with [`ErrorKind`], which
//! is what the failure policy and the logs report.

use crate::broker::BrokerError;
use crate::ingress::IngressError;
use crate::invoker::InvokeError;
use crate::schema::CodecError;
use std::fmt;
use thiserror::Error;

/// Result type alias for the sidecar runtime
pub type Result<T> = std::result::Result<T, SidecarError>;

/// Top-level error for the sidecar runtime
#[derive(Debug, Error)]
pub enum SidecarError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Component setup failed
    #[error("Startup error: {0}")]
    Startup(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl SidecarError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }
}

/// Failure class of a pipeline error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O with the schema source, the business endpoint or the broker
    Transport,
    /// Malformed bytes or JSON, or a value the schema rejects
    Format,
    /// Topic outside the allow-list
    Authorization,
    /// Offset commit failed after an otherwise successful flow
    Commit,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Format => write!(f, "format"),
            Self::Authorization => write!(f, "authorization"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// Orchestrator stage failures
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Inbound wire value could not be decoded
    #[error("Decode failed: {0}")]
    Decode(#[source] CodecError),

    /// Business endpoint call failed
    #[error("Invoke failed: {0}")]
    Invoke(#[from] InvokeError),

    /// Business endpoint answered with something other than a batch
    #[error("Malformed response body: {0}")]
    ResponseFormat(#[source] serde_json::Error),

    /// Ingress body is not a batch
    #[error("Malformed ingress body: {0}")]
    BodyFormat(#[source] serde_json::Error),

    #[error("Topic '{topic}' is not in the allow-list")]
    Unauthorized { topic: String },

    #[error("Encode for topic '{topic}' failed: {source}")]
    Encode {
        topic: String,
        #[source]
        source: CodecError,
    },

    #[error("Publish failed: {0}")]
    Publish(#[source] BrokerError),

    #[error("Commit failed: {0}")]
    Commit(#[source] BrokerError),

    /// Error reported by the broker listener
    #[error("Listen failed: {0}")]
    Listen(#[source] BrokerError),

    #[error("Ingress failed: {0}")]
    Ingress(#[from] IngressError),
}

impl PipelineError {
    /// Classify the failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode(e) | Self::Encode { source: e, .. } => codec_kind(e),
            Self::Invoke(_) | Self::Publish(_) | Self::Listen(_) | Self::Ingress(_) => {
                ErrorKind::Transport
            }
            Self::ResponseFormat(_) | Self::BodyFormat(_) => ErrorKind::Format,
            Self::Unauthorized { .. } => ErrorKind::Authorization,
            Self::Commit(_) => ErrorKind::Commit,
        }
    }

    /// Shutdown notice from the listener rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Listen(e) if e.is_cancelled())
    }
}

fn codec_kind(err: &CodecError) -> ErrorKind {
    if err.is_transport() {
        ErrorKind::Transport
    } else {
        ErrorKind::Format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistryError;

    #[test]
    fn test_error_display() {
        let err = PipelineError::Unauthorized {
            topic: "payments".into(),
        };
        assert_eq!(err.to_string(), "Topic 'payments' is not in the allow-list");
    }

    #[test]
    fn test_codec_kind() {
        let short = PipelineError::Decode(CodecError::ShortPayload(3));
        assert_eq!(short.kind(), ErrorKind::Format);

        let registry = PipelineError::Encode {
            topic: "orders".into(),
            source: CodecError::Registry(SchemaRegistryError::NetworkError("refused".into())),
        };
        assert_eq!(registry.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_kind_mapping() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(PipelineError::ResponseFormat(json_err).kind(), ErrorKind::Format);

        let commit = PipelineError::Commit(BrokerError::Commit {
            topic: "orders".into(),
            message: "rebalance".into(),
        });
        assert_eq!(commit.kind(), ErrorKind::Commit);

        let invoke = PipelineError::Invoke(InvokeError::Status {
            status: 500,
            body: String::new(),
        });
        assert_eq!(invoke.kind(), ErrorKind::Transport);
        assert_eq!(ErrorKind::Authorization.to_string(), "authorization");
    }

    #[test]
    fn test_cancelled_check() {
        assert!(PipelineError::Listen(BrokerError::Cancelled).is_cancelled());
        assert!(!PipelineError::Publish(BrokerError::Cancelled).is_cancelled());
    }

    #[test]
    fn test_sidecar_error_from_pipeline() {
        let err: SidecarError = PipelineError::Unauthorized { topic: "x".into() }.into();
        assert!(matches!(err, SidecarError::Pipeline(_)));
        assert_eq!(SidecarError::config("bad").to_string(), "Configuration error: bad");
    }
}
