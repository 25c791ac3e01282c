//! Broker connector: connection and session lifecycle for a pipeline stage.
//!
//! The connector opens one broker connection and one or more sessions on it,
//! doing every blocking broker call on a worker dispatcher. Results reach the
//! owning stage only through the callback bridge, so stage state is mutated
//! from a single task.
//!
//! # Core Invariants
//!
//! 1. **Single Writer**: Connection and session-list state change only on the stage task
//! 2. **Ordered ACKs**: Acknowledgments drain in submit order, bounded by `max_pending_acks`
//! 3. **One Transaction In-Flight**: A TxSession holds at most one pending commit/rollback
//! 4. **Always Stoppable**: Closing an AckSession never deadlocks, whatever the queue fill
//! 5. **Fail Once**: The first failure is delivered once; nothing is reported after it
//!
//! # Architecture
//!
//! ```text
//! Connector --(dispatcher)--> Broker: connect, start, open N sessions
//!     |
//!     +--- StageCallbacks ---> ConnectorStage (single task) ---> StageHandler
//!
//! listener thread --ack/commit--> [bounded queue] --drain--> Broker
//! ```

pub mod ack_session;
pub mod bridge;
pub mod broker;
pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod error;
pub mod session;
pub mod stage;
pub mod tx_session;

#[cfg(test)]
mod tests;

pub use ack_session::{AckDrain, AckOutcome, AckSession, AckSessionState};
pub use bridge::{stage_channel, StageCallbacks, StageEvent, WeakStageCallbacks};
pub use broker::{
    AcknowledgeMode, BrokerConnection, BrokerConsumer, BrokerMessage, BrokerProducer,
    BrokerSession, ConnectionFactory, DestinationHandle, ExceptionListener,
};
pub use config::{ConnectorRole, ConnectorSettings, Credentials, DestinationSpec};
pub use connector::Connector;
pub use dispatcher::{Dispatcher, DispatcherRegistry, DEFAULT_DISPATCHER};
pub use error::{BrokerError, BrokerResult, ConnectorError, ConnectorResult};
pub use session::{PlainSession, Session, SessionCore, SessionId, StopReason};
pub use stage::{ConnectorStage, StageHandler};
pub use tx_session::{TxDrain, TxEnvelope, TxOutcome, TxSession, TxSessionState};
