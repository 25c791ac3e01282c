//! Client-acknowledge sessions.
//!
//! Listener threads call [`AckSession::ack`] for each processed message. The
//! acknowledgment is queued, not performed: a single drain loop owning the
//! [`AckDrain`] executes queued acknowledgments in submit order.
//!
//! The queue holds `max_pending_acks + 1` entries. At most `max_pending_acks`
//! of them are acknowledgments; `ack` blocks until the drain loop frees one.
//! The extra entry is reserved for the stop sentinel, so closing the session
//! always reaches a drain loop, even one facing a full queue.

use crate::broker::BrokerMessage;
use crate::error::{ConnectorError, ConnectorResult};
use crate::session::{SessionCore, StopReason};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Lifecycle of an [`AckSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckSessionState {
    Open,
    /// Stop sentinel queued, channel close in progress.
    Closing,
    Closed,
}

/// Result of draining one queued entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// A message was acknowledged with the broker.
    Acknowledged,
    /// The stop sentinel was reached; the drain loop must exit.
    Stopped(StopReason),
}

enum AckCommand {
    Ack(Box<dyn BrokerMessage>),
    Stop(StopReason),
}

struct AckQueueState {
    pending: usize,
    lifecycle: AckSessionState,
}

struct AckInner {
    core: SessionCore,
    max_pending_acks: usize,
    state: Mutex<AckQueueState>,
    slot_freed: Condvar,
    tx: mpsc::Sender<AckCommand>,
    rx: Mutex<Option<mpsc::Receiver<AckCommand>>>,
}

/// A session whose messages are acknowledged explicitly, in order.
#[derive(Clone)]
pub struct AckSession {
    inner: Arc<AckInner>,
}

impl AckSession {
    /// Wrap an opened session core. `max_pending_acks` is clamped to at least 1.
    pub fn new(core: SessionCore, max_pending_acks: usize) -> Self {
        let max_pending_acks = max_pending_acks.max(1);
        let (tx, rx) = mpsc::channel(max_pending_acks + 1);

        Self {
            inner: Arc::new(AckInner {
                core,
                max_pending_acks,
                state: Mutex::new(AckQueueState {
                    pending: 0,
                    lifecycle: AckSessionState::Open,
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

    pub fn max_pending_acks(&self) -> usize {
        self.inner.max_pending_acks
    }

    /// Capacity of the ack queue, including the slot reserved for stop.
    pub fn queue_capacity(&self) -> usize {
        self.inner.tx.max_capacity()
    }

    /// Acknowledgments queued or executing but not yet finished.
    pub fn pending_acks(&self) -> usize {
        self.inner.state.lock().pending
    }

    pub fn state(&self) -> AckSessionState {
        self.inner.state.lock().lifecycle
    }

    /// Take the receiving half of the ack queue. Returns `None` after the
    /// first call: there is exactly one drain loop per session.
    pub fn take_drain(&self) -> Option<AckDrain> {
        self.inner.rx.lock().take().map(|rx| AckDrain {
            rx,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Queue an acknowledgment for `message`.
    ///
    /// Blocks the calling thread while `max_pending_acks` acknowledgments are
    /// outstanding. Fails with `SessionClosed` once the session is closing,
    /// including for callers blocked at that moment.
    pub fn ack(&self, message: Box<dyn BrokerMessage>) -> ConnectorResult<()> {
        let mut state = self.inner.state.lock();
        loop {
            if state.lifecycle != AckSessionState::Open {
                return Err(self.closed_error());
            }
            if state.pending < self.inner.max_pending_acks {
                break;
            }
            self.inner.slot_freed.wait(&mut state);
        }

        // Queued acks never exceed `pending`, so a slot is always free here.
        match self.inner.tx.try_send(AckCommand::Ack(message)) {
            Ok(()) => {
                state.pending += 1;
                Ok(())
            }
            Err(e) => {
                error!(session_id = %self.core().id(), error = %e, "Ack queue rejected entry");
                Err(self.closed_error())
            }
        }
    }

    /// Stop the drain loop and close the channel.
    pub fn close_session(&self) -> ConnectorResult<()> {
        self.stop(StopReason::Closed)
    }

    /// Same as close, tagged abnormal.
    pub fn abort_session(&self) -> ConnectorResult<()> {
        self.stop(StopReason::Aborted)
    }

    fn stop(&self, reason: StopReason) -> ConnectorResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle != AckSessionState::Open {
                return Ok(());
            }
            state.lifecycle = AckSessionState::Closing;

            // Uses the reserved slot; fails only if the drain was dropped.
            if self.inner.tx.try_send(AckCommand::Stop(reason)).is_err() {
                debug!(session_id = %self.core().id(), "Ack drain gone, stop not queued");
            }
            self.inner.slot_freed.notify_all();
        }

        let result = self.inner.core.close_channel(reason);
        self.inner.state.lock().lifecycle = AckSessionState::Closed;
        result
    }

    fn closed_error(&self) -> ConnectorError {
        ConnectorError::SessionClosed(self.core().id().to_string())
    }
}

/// The receiving half of an ack queue, owned by the drain loop.
pub struct AckDrain {
    rx: mpsc::Receiver<AckCommand>,
    inner: Arc<AckInner>,
}

impl AckDrain {
    /// Wait for the next entry and execute it.
    ///
    /// Blocks the calling thread; must not be called from async code.
    /// A broker failure while acknowledging is returned as an error; the
    /// slot is released either way.
    pub fn drain_next_blocking(&mut self) -> ConnectorResult<AckOutcome> {
        match self.rx.blocking_recv() {
            Some(AckCommand::Ack(message)) => {
                let result = message.acknowledge();
                self.release_slot();
                result?;
                Ok(AckOutcome::Acknowledged)
            }
            Some(AckCommand::Stop(reason)) => {
                debug!(session_id = %self.inner.core.id(), reason = ?reason, "Ack drain stopped");
                Ok(AckOutcome::Stopped(reason))
            }
            None => Ok(AckOutcome::Stopped(StopReason::Closed)),
        }
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock();
        state.pending = state.pending.saturating_sub(1);
        self.inner.slot_freed.notify_one();
    }
}
