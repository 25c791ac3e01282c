//! Transacted sessions.
//!
//! A transacted session carries at most one pending transaction boundary.
//! The stage issues `commit(envelope)` or `rollback(envelope)` for the batch
//! it just processed; the listener thread that owns the [`TxDrain`] picks the
//! action up and applies it only if the envelope matches the batch it holds.
//!
//! The queue has two slots: one for the pending action and one reserved for
//! the stop sentinel, so close and abort never wait on the drain. Actions
//! still queued when the session closes are discarded, never applied.

use crate::error::{ConnectorError, ConnectorResult};
use crate::session::{SessionCore, StopReason};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Token identifying one transactional batch of messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxEnvelope(Uuid);

impl TxEnvelope {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TxEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Lifecycle of a [`TxSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxSessionState {
    Open,
    /// A commit or rollback is queued and not yet drained.
    TxPending,
    Closing,
    Closed,
}

/// Result of draining the pending action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    RolledBack,
    /// The stop sentinel was reached; the drain loop must exit.
    Stopped(StopReason),
}

#[derive(Debug, Clone, Copy)]
enum TxCommand {
    Commit(TxEnvelope),
    Rollback(TxEnvelope),
    Stop(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Closing,
    Closed,
}

struct TxQueueState {
    pending: bool,
    lifecycle: Lifecycle,
}

struct TxInner {
    core: SessionCore,
    state: Mutex<TxQueueState>,
    slot_freed: Condvar,
    tx: mpsc::Sender<TxCommand>,
    rx: Mutex<Option<mpsc::Receiver<TxCommand>>>,
}

/// A session whose deliveries are committed or rolled back as batches.
#[derive(Clone)]
pub struct TxSession {
    inner: Arc<TxInner>,
}

impl TxSession {
    pub fn new(core: SessionCore) -> Self {
        let (tx, rx) = mpsc::channel(2);
        Self {
            inner: Arc::new(TxInner {
                core,
                state: Mutex::new(TxQueueState {
                    pending: false,
                    lifecycle: Lifecycle::Open,
                }),
                slot_freed: Condvar::new(),
                tx,
                rx: Mutex::new(Some(rx)),
            }),
        }
    }

    pub fn core(&self) -> &SessionCore {
        &self.inner.core
    }

    pub fn state(&self) -> TxSessionState {
        let state = self.inner.state.lock();
        match state.lifecycle {
            Lifecycle::Closing => TxSessionState::Closing,
            Lifecycle::Closed => TxSessionState::Closed,
            Lifecycle::Open if state.pending => TxSessionState::TxPending,
            Lifecycle::Open => TxSessionState::Open,
        }
    }

    /// Take the receiving half of the commit queue. Returns `None` after the
    /// first call.
    pub fn take_drain(&self) -> Option<TxDrain> {
        self.inner.rx.lock().take().map(|rx| TxDrain {
            rx,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Queue a commit for the batch identified by `envelope`.
    ///
    /// Blocks the calling thread while a previous commit or rollback is
    /// pending. Fails with `SessionClosed` once the session is closing,
    /// including for callers blocked at that moment.
    pub fn commit(&self, envelope: TxEnvelope) -> ConnectorResult<()> {
        self.enqueue(TxCommand::Commit(envelope))
    }

    /// Queue a rollback for the batch identified by `envelope`.
    ///
    /// Blocking behavior as for [`TxSession::commit`].
    pub fn rollback(&self, envelope: TxEnvelope) -> ConnectorResult<()> {
        self.enqueue(TxCommand::Rollback(envelope))
    }

    /// [`TxSession::commit`] on the session's dispatcher.
    pub async fn commit_async(&self, envelope: TxEnvelope) -> ConnectorResult<()> {
        let session = self.clone();
        self.core()
            .dispatcher()
            .run_blocking(move || session.commit(envelope))
            .await
    }

    /// [`TxSession::rollback`] on the session's dispatcher.
    pub async fn rollback_async(&self, envelope: TxEnvelope) -> ConnectorResult<()> {
        let session = self.clone();
        self.core()
            .dispatcher()
            .run_blocking(move || session.rollback(envelope))
            .await
    }

    /// Stop the drain loop and close the channel. A pending action is
    /// discarded.
    pub fn close_session(&self) -> ConnectorResult<()> {
        self.stop(StopReason::Closed)
    }

    /// Same as close, tagged abnormal.
    pub fn abort_session(&self) -> ConnectorResult<()> {
        self.stop(StopReason::Aborted)
    }

    fn enqueue(&self, command: TxCommand) -> ConnectorResult<()> {
        let mut state = self.inner.state.lock();
        loop {
            if state.lifecycle != Lifecycle::Open {
                return Err(self.closed_error());
            }
            if !state.pending {
                break;
            }
            self.inner.slot_freed.wait(&mut state);
        }

        // At most one action is ever queued, so its slot is free here.
        match self.inner.tx.try_send(command) {
            Ok(()) => {
                state.pending = true;
                Ok(())
            }
            Err(e) => {
                error!(session_id = %self.core().id(), error = %e, "Commit queue rejected entry");
                Err(self.closed_error())
            }
        }
    }

    fn stop(&self, reason: StopReason) -> ConnectorResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle != Lifecycle::Open {
                return Ok(());
            }
            state.lifecycle = Lifecycle::Closing;

            // Uses the reserved slot; fails only if the drain was dropped.
            if self.inner.tx.try_send(TxCommand::Stop(reason)).is_err() {
                debug!(session_id = %self.core().id(), "Commit drain gone, stop not queued");
            }
            self.inner.slot_freed.notify_all();
        }

        let result = self.inner.core.close_channel(reason);
        self.inner.state.lock().lifecycle = Lifecycle::Closed;
        result
    }

    fn closed_error(&self) -> ConnectorError {
        ConnectorError::SessionClosed(self.core().id().to_string())
    }
}

/// The receiving half of a commit queue, owned by the listener thread.
pub struct TxDrain {
    rx: mpsc::Receiver<TxCommand>,
    inner: Arc<TxInner>,
}

impl TxDrain {
    /// Wait for the pending action and apply it to the batch `presented`.
    ///
    /// Blocks the calling thread; must not be called from async code. An
    /// action queued for another envelope fails with `EnvelopeMismatch` and
    /// leaves the broker transaction untouched. Actions left over from before
    /// a close are skipped.
    pub fn drain_next_blocking(&mut self, presented: &TxEnvelope) -> ConnectorResult<TxOutcome> {
        loop {
            let command = match self.rx.blocking_recv() {
                Some(TxCommand::Stop(reason)) => {
                    debug!(session_id = %self.inner.core.id(), reason = ?reason, "Commit drain stopped");
                    return Ok(TxOutcome::Stopped(reason));
                }
                Some(command) => command,
                None => return Ok(TxOutcome::Stopped(StopReason::Closed)),
            };

            // Held across the broker call; close waits on it.
            let mut state = self.inner.state.lock();
            let applied = if state.lifecycle == Lifecycle::Open {
                Some(self.apply(command, *presented))
            } else {
                debug!(session_id = %self.inner.core.id(), "Discarding action queued before close");
                None
            };
            state.pending = false;
            self.inner.slot_freed.notify_one();
            drop(state);

            if let Some(result) = applied {
                return result;
            }
        }
    }

    fn apply(&self, command: TxCommand, presented: TxEnvelope) -> ConnectorResult<TxOutcome> {
        let session_id = self.inner.core.id();
        match command {
            TxCommand::Commit(expected) => {
                self.check_envelope(expected, presented)?;
                self.inner.core.channel().commit()?;
                info!(session_id = %session_id, envelope = %expected, "Committed transaction");
                Ok(TxOutcome::Committed)
            }
            TxCommand::Rollback(expected) => {
                self.check_envelope(expected, presented)?;
                self.inner.core.channel().rollback()?;
                info!(session_id = %session_id, envelope = %expected, "Rolled back transaction");
                Ok(TxOutcome::RolledBack)
            }
            TxCommand::Stop(reason) => Ok(TxOutcome::Stopped(reason)),
        }
    }

    fn check_envelope(&self, expected: TxEnvelope, presented: TxEnvelope) -> ConnectorResult<()> {
        if expected == presented {
            return Ok(());
        }
        error!(
            session_id = %self.inner.core.id(),
            expected = %expected,
            presented = %presented,
            "Transaction envelope mismatch"
        );
        Err(ConnectorError::EnvelopeMismatch {
            expected,
            presented,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelopes_are_unique() {
        let a = TxEnvelope::new();
        let b = TxEnvelope::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("tx-"));
    }
}
