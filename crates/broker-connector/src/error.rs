//! Error types for the broker connector.

use crate::tx_session::TxEnvelope;
use thiserror::Error;

/// Failure reported by the broker client library.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BrokerError {
    /// Human-readable description from the broker client.
    pub message: String,
    /// Vendor-specific error code, when the client supplies one.
    pub error_code: Option<String>,
}

impl BrokerError {
    /// Create a broker error without a vendor code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code: None,
        }
    }

    /// Attach a vendor error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }
}

/// Connector error type.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Missing destination, unknown dispatcher or invalid settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// A broker call (create, ack, commit, close) failed
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Asynchronous exception raised by the connection, e.g. connection loss
    #[error("Connection failure: {0}")]
    ConnectionFailure(BrokerError),

    /// A commit or rollback was drained against another transaction's envelope
    #[error("Envelope mismatch: pending action belongs to {expected}, drain presented {presented}")]
    EnvelopeMismatch {
        expected: TxEnvelope,
        presented: TxEnvelope,
    },

    /// The session is closing or closed
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// A worker task panicked or was cancelled
    #[error("Worker error: {0}")]
    Worker(String),
}

impl ConnectorError {
    /// Whether this error came from the broker rather than from configuration
    /// or an internal protocol violation.
    pub fn is_broker(&self) -> bool {
        matches!(
            self,
            ConnectorError::Broker(_) | ConnectorError::ConnectionFailure(_)
        )
    }
}

/// Result type for broker client calls.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
