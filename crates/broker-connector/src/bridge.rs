//! Callback bridge from worker threads to the stage task.
//!
//! Workers never touch stage state. They push [`StageEvent`]s into an
//! unbounded channel; the stage drains it on its own task, one event at a
//! time, in send order.

use crate::broker::BrokerConnection;
use crate::error::ConnectorError;
use crate::session::Session;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A state change produced off the stage task.
pub enum StageEvent {
    /// The connection was created and started.
    ConnectionEstablished(Arc<dyn BrokerConnection>),
    /// A session was opened. Sent once per session, in open order.
    SessionOpened(Session),
    /// A fatal error. Always the last event delivered.
    Failure(ConnectorError),
}

impl fmt::Debug for StageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageEvent::ConnectionEstablished(_) => f.write_str("ConnectionEstablished"),
            StageEvent::SessionOpened(session) => {
                write!(f, "SessionOpened({})", session.id())
            }
            StageEvent::Failure(e) => write!(f, "Failure({})", e),
        }
    }
}

/// Sending half of the bridge, cloned into every worker that reports back.
///
/// The failed flag and every send share one lock, so no event can be queued
/// behind a failure.
#[derive(Clone)]
pub struct StageCallbacks {
    tx: mpsc::UnboundedSender<StageEvent>,
    failed: Arc<Mutex<bool>>,
}

/// Create a connected callback/receiver pair.
pub fn stage_channel() -> (StageCallbacks, mpsc::UnboundedReceiver<StageEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        StageCallbacks {
            tx,
            failed: Arc::new(Mutex::new(false)),
        },
        rx,
    )
}

impl StageCallbacks {
    /// Report the established connection.
    ///
    /// Returns `false` if the stage already failed or is gone.
    pub fn connection_established(&self, connection: Arc<dyn BrokerConnection>) -> bool {
        let failed = self.failed.lock();
        if *failed {
            return false;
        }
        self.tx
            .send(StageEvent::ConnectionEstablished(connection))
            .is_ok()
    }

    /// Report an opened session.
    ///
    /// Hands the session back if it could not be delivered, so the caller can
    /// close it.
    pub fn session_opened(&self, session: Session) -> Result<(), Session> {
        let failed = self.failed.lock();
        if *failed {
            debug!(session_id = %session.id(), "Stage failed, session not delivered");
            return Err(session);
        }
        match self.tx.send(StageEvent::SessionOpened(session)) {
            Err(mpsc::error::SendError(StageEvent::SessionOpened(session))) => Err(session),
            _ => Ok(()),
        }
    }

    /// Report a fatal error. Only the first call is delivered.
    pub fn fail(&self, error: ConnectorError) -> bool {
        deliver_failure(&self.failed, &self.tx, error)
    }

    pub fn has_failed(&self) -> bool {
        *self.failed.lock()
    }

    /// A handle that can report failure without keeping the bridge open.
    pub fn downgrade(&self) -> WeakStageCallbacks {
        WeakStageCallbacks {
            tx: self.tx.downgrade(),
            failed: Arc::clone(&self.failed),
        }
    }
}

/// Failure-only reporter for long-lived holders such as exception listeners.
///
/// Once every [`StageCallbacks`] is dropped the bridge closes, whatever weak
/// handles remain.
#[derive(Clone)]
pub struct WeakStageCallbacks {
    tx: mpsc::WeakUnboundedSender<StageEvent>,
    failed: Arc<Mutex<bool>>,
}

impl WeakStageCallbacks {
    /// Report a fatal error if the bridge is still open. Only the first
    /// failure across all handles is delivered.
    pub fn fail(&self, error: ConnectorError) -> bool {
        match self.tx.upgrade() {
            Some(tx) => deliver_failure(&self.failed, &tx, error),
            None => {
                debug!(error = %error, "Stage bridge closed, dropping error");
                false
            }
        }
    }
}

fn deliver_failure(
    failed: &Mutex<bool>,
    tx: &mpsc::UnboundedSender<StageEvent>,
    error: ConnectorError,
) -> bool {
    let mut failed = failed.lock();
    if *failed {
        debug!(error = %error, "Stage already failed, dropping error");
        return false;
    }
    *failed = true;
    warn!(error = %error, "Connector failed");
    tx.send(StageEvent::Failure(error)).is_ok()
}
