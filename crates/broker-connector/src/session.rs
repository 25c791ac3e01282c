//! Sessions opened on a broker connection.
//!
//! Every session role shares a [`SessionCore`]: the connection reference, the
//! broker channel, the resolved destination and the dispatcher that runs
//! channel calls. [`Session`] is the closed set of roles the connector hands
//! to the stage.

use crate::ack_session::AckSession;
use crate::broker::{
    AcknowledgeMode, BrokerConnection, BrokerConsumer, BrokerProducer, BrokerSession,
    DestinationHandle,
};
use crate::config::DestinationSpec;
use crate::dispatcher::Dispatcher;
use crate::error::{BrokerResult, ConnectorResult};
use crate::tx_session::TxSession;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifier of a session, used for logging and lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a session's drain loop was told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Normal shutdown.
    Closed,
    /// Abnormal shutdown; in-flight work is abandoned.
    Aborted,
}

impl StopReason {
    pub fn is_abnormal(self) -> bool {
        matches!(self, StopReason::Aborted)
    }
}

/// State shared by every session role.
pub struct SessionCore {
    id: SessionId,
    connection: Arc<dyn BrokerConnection>,
    channel: Arc<dyn BrokerSession>,
    destination: DestinationHandle,
    spec: DestinationSpec,
    selector: Option<String>,
    dispatcher: Dispatcher,
    closed: AtomicBool,
}

impl SessionCore {
    /// Open a channel on the connection and resolve the destination on it.
    ///
    /// `selector` is the default for consumers created on this session.
    /// Blocks on broker I/O; call from a dispatcher thread.
    pub fn open(
        connection: &Arc<dyn BrokerConnection>,
        mode: AcknowledgeMode,
        spec: &DestinationSpec,
        selector: Option<&str>,
        dispatcher: Dispatcher,
    ) -> ConnectorResult<Self> {
        let channel = connection.create_session(mode)?;
        let destination = match channel.resolve_destination(spec) {
            Ok(destination) => destination,
            Err(e) => {
                if let Err(close_err) = channel.close() {
                    debug!(error = %close_err, "Failed to close channel after resolve error");
                }
                return Err(e.into());
            }
        };

        let id = SessionId::new();
        debug!(
            session_id = %id,
            destination = %destination,
            mode = ?mode,
            "Opened session"
        );

        Ok(Self {
            id,
            connection: Arc::clone(connection),
            channel,
            destination,
            spec: spec.clone(),
            selector: selector.map(str::to_string),
            dispatcher,
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn connection(&self) -> &Arc<dyn BrokerConnection> {
        &self.connection
    }

    pub fn channel(&self) -> &Arc<dyn BrokerSession> {
        &self.channel
    }

    pub fn destination(&self) -> &DestinationHandle {
        &self.destination
    }

    pub fn destination_spec(&self) -> &DestinationSpec {
        &self.spec
    }

    /// Selector applied when `create_consumer` is given none.
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Create a producer for the bound destination.
    pub async fn create_producer(&self) -> ConnectorResult<Box<dyn BrokerProducer>> {
        let channel = Arc::clone(&self.channel);
        let destination = self.destination.clone();
        self.dispatcher
            .run_blocking(move || Ok(channel.create_producer(&destination)?))
            .await
    }

    /// Create a consumer for the bound destination. Without an explicit
    /// selector, the session's configured selector applies.
    pub async fn create_consumer(
        &self,
        selector: Option<&str>,
    ) -> ConnectorResult<Box<dyn BrokerConsumer>> {
        let channel = Arc::clone(&self.channel);
        let destination = self.destination.clone();
        let spec = self.spec.clone();
        let selector = selector.or(self.selector()).map(str::to_string);
        self.dispatcher
            .run_blocking(move || {
                Ok(open_consumer(
                    channel.as_ref(),
                    &destination,
                    &spec,
                    selector.as_deref(),
                )?)
            })
            .await
    }

    /// Close the broker channel once. Later calls are no-ops.
    pub(crate) fn close_channel(&self, reason: StopReason) -> ConnectorResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if reason.is_abnormal() {
            warn!(session_id = %self.id, abnormal = true, "Aborting session");
        } else {
            info!(session_id = %self.id, "Closing session");
        }

        self.channel.close()?;
        Ok(())
    }
}

/// Pick the consumer creation path for a destination and selector.
fn open_consumer(
    channel: &dyn BrokerSession,
    destination: &DestinationHandle,
    spec: &DestinationSpec,
    selector: Option<&str>,
) -> BrokerResult<Box<dyn BrokerConsumer>> {
    match (selector, spec.durable_subscription()) {
        (None, Some(subscription)) => channel.create_durable_subscriber(destination, subscription),
        (Some(selector), Some(subscription)) => channel.create_durable_subscriber_with_selector(
            destination,
            subscription,
            selector,
            false,
        ),
        (Some(selector), None) => channel.create_consumer_with_selector(destination, selector),
        (None, None) => channel.create_consumer(destination),
    }
}

/// A session with no acknowledgment or transaction discipline.
#[derive(Clone)]
pub struct PlainSession {
    core: Arc<SessionCore>,
}

impl PlainSession {
    pub fn new(core: SessionCore) -> Self {
        Self {
            core: Arc::new(core),
        }
    }

    pub fn core(&self) -> &SessionCore {
        &self.core
    }

    pub fn close_session(&self) -> ConnectorResult<()> {
        self.core.close_channel(StopReason::Closed)
    }

    /// Same as close: a plain session holds no ack or transaction state.
    pub fn abort_session(&self) -> ConnectorResult<()> {
        self.core.close_channel(StopReason::Aborted)
    }
}

/// A session opened by the connector, by role.
#[derive(Clone)]
pub enum Session {
    Plain(PlainSession),
    Ack(AckSession),
    Tx(TxSession),
}

impl Session {
    pub fn core(&self) -> &SessionCore {
        match self {
            Session::Plain(session) => session.core(),
            Session::Ack(session) => session.core(),
            Session::Tx(session) => session.core(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.core().id()
    }

    pub fn as_ack(&self) -> Option<&AckSession> {
        match self {
            Session::Ack(session) => Some(session),
            _ => None,
        }
    }

    pub fn as_tx(&self) -> Option<&TxSession> {
        match self {
            Session::Tx(session) => Some(session),
            _ => None,
        }
    }

    pub async fn create_producer(&self) -> ConnectorResult<Box<dyn BrokerProducer>> {
        self.core().create_producer().await
    }

    pub async fn create_consumer(
        &self,
        selector: Option<&str>,
    ) -> ConnectorResult<Box<dyn BrokerConsumer>> {
        self.core().create_consumer(selector).await
    }

    /// Close the session. May block; call from a worker or listener thread.
    pub fn close_session(&self) -> ConnectorResult<()> {
        match self {
            Session::Plain(session) => session.close_session(),
            Session::Ack(session) => session.close_session(),
            Session::Tx(session) => session.close_session(),
        }
    }

    /// Abort the session. May block; call from a worker or listener thread.
    pub fn abort_session(&self) -> ConnectorResult<()> {
        match self {
            Session::Plain(session) => session.abort_session(),
            Session::Ack(session) => session.abort_session(),
            Session::Tx(session) => session.abort_session(),
        }
    }

    /// Close the session on its dispatcher.
    pub async fn close_session_async(&self) -> ConnectorResult<()> {
        let session = self.clone();
        self.core()
            .dispatcher()
            .run_blocking(move || session.close_session())
            .await
    }

    /// Abort the session on its dispatcher.
    pub async fn abort_session_async(&self) -> ConnectorResult<()> {
        let session = self.clone();
        self.core()
            .dispatcher()
            .run_blocking(move || session.abort_session())
            .await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self {
            Session::Plain(_) => "Plain",
            Session::Ack(_) => "Ack",
            Session::Tx(_) => "Tx",
        };
        f.debug_struct("Session")
            .field("role", &role)
            .field("id", &self.id())
            .field("destination", self.core().destination())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_stop_reason_abnormal() {
        assert!(StopReason::Aborted.is_abnormal());
        assert!(!StopReason::Closed.is_abnormal());
    }
}
