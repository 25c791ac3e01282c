//! Capability traits for the broker client library.
//!
//! The connector never talks to a broker directly. Everything it needs is
//! expressed here as blocking calls; the connector runs them on a worker
//! dispatcher so the stage task never blocks.

use crate::config::{Credentials, DestinationSpec};
use crate::error::{BrokerError, BrokerResult};
use std::fmt;
use std::sync::Arc;

/// Callback invoked by the broker client on asynchronous connection errors.
pub type ExceptionListener = Box<dyn Fn(BrokerError) + Send + Sync>;

/// How messages received on a session are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcknowledgeMode {
    /// The broker client acknowledges on delivery.
    Auto,
    /// The application acknowledges each message explicitly.
    Client,
    /// Messages are acknowledged by committing the session's transaction.
    Transacted,
}

/// A destination resolved by a broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationHandle {
    Queue(String),
    Topic(String),
}

impl DestinationHandle {
    /// Destination name as known to the broker.
    pub fn name(&self) -> &str {
        match self {
            DestinationHandle::Queue(name) | DestinationHandle::Topic(name) => name,
        }
    }
}

impl fmt::Display for DestinationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationHandle::Queue(name) => write!(f, "queue://{}", name),
            DestinationHandle::Topic(name) => write!(f, "topic://{}", name),
        }
    }
}

/// Produces broker connections.
pub trait ConnectionFactory: Send + Sync {
    /// Open a connection, authenticating when credentials are given.
    fn create_connection(
        &self,
        credentials: Option<&Credentials>,
    ) -> BrokerResult<Arc<dyn BrokerConnection>>;
}

/// A physical broker connection.
pub trait BrokerConnection: Send + Sync {
    /// Install the listener for asynchronous connection exceptions.
    fn set_exception_listener(&self, listener: ExceptionListener) -> BrokerResult<()>;

    /// Set the client identifier. Must happen before `start`.
    fn set_client_id(&self, client_id: &str) -> BrokerResult<()>;

    /// Start delivery of inbound messages.
    fn start(&self) -> BrokerResult<()>;

    /// Open a new session on this connection.
    fn create_session(&self, mode: AcknowledgeMode) -> BrokerResult<Arc<dyn BrokerSession>>;

    /// Close the connection and every session on it.
    fn close(&self) -> BrokerResult<()>;
}

/// A logical channel on a connection.
pub trait BrokerSession: Send + Sync {
    /// Turn a configured destination into a broker destination.
    fn resolve_destination(&self, spec: &DestinationSpec) -> BrokerResult<DestinationHandle>;

    fn create_producer(&self, destination: &DestinationHandle)
        -> BrokerResult<Box<dyn BrokerProducer>>;

    fn create_consumer(&self, destination: &DestinationHandle)
        -> BrokerResult<Box<dyn BrokerConsumer>>;

    fn create_consumer_with_selector(
        &self,
        destination: &DestinationHandle,
        selector: &str,
    ) -> BrokerResult<Box<dyn BrokerConsumer>>;

    fn create_durable_subscriber(
        &self,
        topic: &DestinationHandle,
        subscription_name: &str,
    ) -> BrokerResult<Box<dyn BrokerConsumer>>;

    fn create_durable_subscriber_with_selector(
        &self,
        topic: &DestinationHandle,
        subscription_name: &str,
        selector: &str,
        no_local: bool,
    ) -> BrokerResult<Box<dyn BrokerConsumer>>;

    /// Commit the current transaction. Transacted sessions only.
    fn commit(&self) -> BrokerResult<()>;

    /// Roll back the current transaction. Transacted sessions only.
    fn rollback(&self) -> BrokerResult<()>;

    fn close(&self) -> BrokerResult<()>;
}

/// Sends messages to the destination it was created for.
pub trait BrokerProducer: Send {
    fn send(&mut self, payload: &[u8]) -> BrokerResult<()>;

    fn close(&mut self) -> BrokerResult<()>;
}

/// Receives messages from the destination it was created for.
pub trait BrokerConsumer: Send {
    fn close(&mut self) -> BrokerResult<()>;
}

/// A delivered message that can be acknowledged.
pub trait BrokerMessage: Send {
    fn acknowledge(&self) -> BrokerResult<()>;
}
