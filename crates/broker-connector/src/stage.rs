//! Stage-side event loop.
//!
//! [`ConnectorStage`] owns the connection handle and the session list. It is
//! the only writer of both, and it only writes while handling a
//! [`StageEvent`] taken from the bridge, one at a time, on a single task.

use crate::bridge::StageEvent;
use crate::broker::BrokerConnection;
use crate::error::{ConnectorError, ConnectorResult};
use crate::session::Session;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Hooks invoked on the stage task as connector events arrive.
pub trait StageHandler: Send {
    fn on_connection_established(&mut self, _connection: &Arc<dyn BrokerConnection>) {}

    fn on_session_opened(&mut self, _session: &Session) {}

    /// Terminal. The stage tears down after this returns.
    fn on_failure(&mut self, _error: &ConnectorError) {}
}

/// Handler that ignores every event.
impl StageHandler for () {}

/// Single-task owner of connector state for one pipeline stage.
pub struct ConnectorStage<H> {
    rx: mpsc::UnboundedReceiver<StageEvent>,
    handler: H,
    connection: Option<Arc<dyn BrokerConnection>>,
    sessions: Vec<Session>,
}

impl<H: StageHandler> ConnectorStage<H> {
    pub fn new(rx: mpsc::UnboundedReceiver<StageEvent>, handler: H) -> Self {
        Self {
            rx,
            handler,
            connection: None,
            sessions: Vec::new(),
        }
    }

    pub fn connection(&self) -> Option<&Arc<dyn BrokerConnection>> {
        self.connection.as_ref()
    }

    /// Opened sessions, in open order.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Wait for and apply the next event.
    ///
    /// Returns `Ok(false)` once every sender is gone, and the failure itself
    /// when a failure event arrives.
    pub async fn process_next(&mut self) -> ConnectorResult<bool> {
        let Some(event) = self.rx.recv().await else {
            return Ok(false);
        };

        match event {
            StageEvent::ConnectionEstablished(connection) => {
                debug!("Connection established");
                self.handler.on_connection_established(&connection);
                self.connection = Some(connection);
            }
            StageEvent::SessionOpened(session) => {
                debug!(session_id = %session.id(), "Session opened");
                self.handler.on_session_opened(&session);
                self.sessions.push(session);
            }
            StageEvent::Failure(error) => {
                warn!(error = %error, "Stage failing");
                self.handler.on_failure(&error);
                return Err(error);
            }
        }
        Ok(true)
    }

    /// Apply events until the bridge closes or a failure arrives, then tear
    /// down sessions and connection.
    pub async fn run(&mut self) -> ConnectorResult<()> {
        let result = loop {
            match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.shutdown().await;
        result
    }

    /// Close every session, then the connection. Errors are logged.
    pub async fn shutdown(&mut self) {
        for session in self.sessions.drain(..) {
            if let Err(e) = session.close_session_async().await {
                warn!(session_id = %session.id(), error = %e, "Failed to close session");
            }
        }

        if let Some(connection) = self.connection.take() {
            let closed = tokio::task::spawn_blocking(move || connection.close()).await;
            match closed {
                Ok(Ok(())) => info!("Broker connection closed"),
                Ok(Err(e)) => warn!(error = %e, "Failed to close broker connection"),
                Err(e) => warn!(error = %e, "Connection close task failed"),
            }
        }
    }
}
