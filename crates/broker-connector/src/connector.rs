//! Connection and session bootstrap.

use crate::ack_session::AckSession;
use crate::bridge::StageCallbacks;
use crate::broker::{BrokerConnection, ConnectionFactory};
use crate::config::{ConnectorRole, ConnectorSettings};
use crate::dispatcher::{Dispatcher, DispatcherRegistry};
use crate::error::{ConnectorError, ConnectorResult};
use crate::session::{PlainSession, Session, SessionCore};
use crate::tx_session::TxSession;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Opens the broker connection and sessions for one pipeline stage.
///
/// All broker calls run on the dispatcher named in the settings. Outcomes
/// reach the stage through its [`StageCallbacks`]:
///
/// 1. `connection_established` once the connection is started
/// 2. `session_opened` for every session, in open order, after all opened
/// 3. `fail` on the first error, after which nothing else is reported
#[derive(Clone)]
pub struct Connector {
    settings: ConnectorSettings,
    factory: Arc<dyn ConnectionFactory>,
    dispatchers: DispatcherRegistry,
    callbacks: StageCallbacks,
}

impl Connector {
    pub fn new(
        settings: ConnectorSettings,
        factory: Arc<dyn ConnectionFactory>,
        dispatchers: DispatcherRegistry,
        callbacks: StageCallbacks,
    ) -> Self {
        Self {
            settings,
            factory,
            dispatchers,
            callbacks,
        }
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    /// Start opening sessions in the background.
    ///
    /// Returns as soon as the work is scheduled. The handle resolves when the
    /// background work is done; by then its outcome has already been reported
    /// through the callbacks. Invalid settings or an unknown dispatcher are
    /// reported through `fail` and returned.
    pub fn init_session_async(&self) -> ConnectorResult<JoinHandle<()>> {
        let dispatcher = match self
            .settings
            .validate()
            .and_then(|()| self.dispatchers.resolve(&self.settings.dispatcher))
        {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                error!(error = %e, "Cannot start connector");
                let reported = match &e {
                    ConnectorError::Config(message) => ConnectorError::Config(message.clone()),
                    other => ConnectorError::Config(other.to_string()),
                };
                self.callbacks.fail(reported);
                return Err(e);
            }
        };

        info!(
            role = ?self.settings.role,
            dispatcher = %dispatcher.name(),
            sessions = self.settings.effective_session_count(),
            "Opening broker sessions"
        );

        let connector = self.clone();
        let worker = dispatcher.clone();
        Ok(dispatcher.spawn(async move {
            let callbacks = connector.callbacks.clone();
            let opener = connector.clone();
            let session_dispatcher = worker.clone();
            let result = worker
                .run_blocking(move || opener.open_sessions(&session_dispatcher))
                .await;

            match result {
                Ok(sessions) => connector.deliver_sessions(sessions).await,
                Err(e) => {
                    error!(error = %e, "Failed to open broker sessions");
                    callbacks.fail(e);
                }
            }
        }))
    }

    /// Create and start the connection, then open the configured number of
    /// sessions on it, one after another.
    ///
    /// Blocks on broker I/O; call from a dispatcher thread.
    pub fn open_sessions(&self, dispatcher: &Dispatcher) -> ConnectorResult<Vec<Session>> {
        let connection = self.establish_connection()?;
        self.callbacks
            .connection_established(Arc::clone(&connection));

        let spec = self.settings.require_destination()?;
        let count = self.settings.effective_session_count();
        let mode = self.settings.role.acknowledge_mode();

        let mut sessions = Vec::with_capacity(count);
        for index in 0..count {
            let selector = self.settings.selector.as_deref();
            match SessionCore::open(&connection, mode, spec, selector, dispatcher.clone()) {
                Ok(core) => {
                    debug!(index, session_id = %core.id(), "Session ready");
                    sessions.push(self.wrap(core));
                }
                Err(e) => {
                    warn!(index, opened = sessions.len(), error = %e, "Session open failed");
                    close_all(&sessions);
                    return Err(e);
                }
            }
        }

        info!(
            destination = %spec.name(),
            sessions = sessions.len(),
            "Opened broker sessions"
        );
        Ok(sessions)
    }

    fn establish_connection(&self) -> ConnectorResult<Arc<dyn BrokerConnection>> {
        let connection = self
            .factory
            .create_connection(self.settings.credentials.as_ref())?;

        if let Err(e) = self.prepare_connection(connection.as_ref()) {
            if let Err(close_err) = connection.close() {
                debug!(error = %close_err, "Failed to close connection after setup error");
            }
            return Err(e);
        }

        info!(
            authenticated = self.settings.credentials.is_some(),
            "Broker connection started"
        );
        Ok(connection)
    }

    fn prepare_connection(&self, connection: &dyn BrokerConnection) -> ConnectorResult<()> {
        let reporter = self.callbacks.downgrade();
        connection.set_exception_listener(Box::new(move |e| {
            reporter.fail(ConnectorError::ConnectionFailure(e));
        }))?;

        if let Some(client_id) = &self.settings.client_id {
            connection.set_client_id(client_id)?;
        }

        connection.start()?;
        Ok(())
    }

    fn wrap(&self, core: SessionCore) -> Session {
        match self.settings.role {
            ConnectorRole::Producer | ConnectorRole::Consumer => {
                Session::Plain(PlainSession::new(core))
            }
            ConnectorRole::AckConsumer => {
                Session::Ack(AckSession::new(core, self.settings.max_pending_acks))
            }
            ConnectorRole::TxConsumer => Session::Tx(TxSession::new(core)),
        }
    }

    async fn deliver_sessions(&self, sessions: Vec<Session>) {
        for session in sessions {
            if let Err(rejected) = self.callbacks.session_opened(session) {
                warn!(session_id = %rejected.id(), "Closing undelivered session");
                if let Err(e) = rejected.close_session_async().await {
                    debug!(error = %e, "Failed to close undelivered session");
                }
            }
        }
    }
}

fn close_all(sessions: &[Session]) {
    for session in sessions {
        if let Err(e) = session.close_session() {
            debug!(session_id = %session.id(), error = %e, "Failed to close session");
        }
    }
}
