//! Transaction function contract
//!
//! A participant is handed a [`TxnContext`] and is expected to:
//!
//! ```text
//! 1. Perform setup / acquisition work
//! 2. ctx.start.started()           - exactly once
//! 3. ctx.inbound.recv()            - blocks for the episode outcome
//! 4. Commit on Some(Ok(())), roll back on Some(Err(_)) or None
//! 5. ctx.outbound.report(err)      - optional, at most once
//! 6. Return                        - counts as "finished"
//! ```
//!
//! `None` from `recv()` means the episode was aborted before an outcome was
//! published (the business function panicked, or scheduling failed).
//!
//! A participant that never calls `started()` stalls the whole episode. The
//! manager cannot detect this; participants must reach step 2.

use crate::latch::Latch;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;
use tracing::warn;

/// Result of the business function; `Ok(())` is success.
pub type Outcome<E> = Result<(), E>;

/// One-shot "setup complete" signal.
///
/// Consumed by [`started`](Self::started), so it can fire at most once.
pub struct StartSignal {
    latch: Option<Arc<Latch>>,
    index: usize,
}

impl StartSignal {
    pub(crate) fn new(latch: Arc<Latch>, index: usize) -> Self {
        Self {
            latch: Some(latch),
            index,
        }
    }

    /// Mark this participant as started
    pub fn started(mut self) {
        if let Some(latch) = self.latch.take() {
            latch.count_down();
        }
    }
}

impl Drop for StartSignal {
    fn drop(&mut self) {
        if self.latch.is_some() {
            warn!(
                target: "txnmgr::episode",
                participant = self.index,
                "Start signal dropped without signaling; episode cannot proceed"
            );
        }
    }
}

impl std::fmt::Debug for StartSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartSignal")
            .field("participant", &self.index)
            .field("signaled", &self.latch.is_none())
            .finish()
    }
}

/// Receive side of a participant's inbound outcome channel.
#[derive(Debug)]
pub struct OutcomeReceiver<E> {
    rx: Receiver<Outcome<E>>,
}

impl<E> OutcomeReceiver<E> {
    pub(crate) fn new(rx: Receiver<Outcome<E>>) -> Self {
        Self { rx }
    }

    /// Block until the episode outcome arrives.
    ///
    /// Returns `None` if the channel closed without a value.
    pub fn recv(self) -> Option<Outcome<E>> {
        self.rx.recv().ok()
    }
}

/// Send side of the episode's shared error channel.
///
/// Consumed on use, so a participant reports at most one error.
#[derive(Debug)]
pub struct ErrorSender<E> {
    tx: SyncSender<E>,
    index: usize,
}

impl<E> ErrorSender<E> {
    pub(crate) fn new(tx: SyncSender<E>, index: usize) -> Self {
        Self { tx, index }
    }

    /// Report this participant's failure.
    ///
    /// Gives the error back if the episode has already been torn down.
    pub fn try_report(self, error: E) -> Result<(), E> {
        self.tx.send(error).map_err(|e| e.0)
    }

    /// Report this participant's failure, logging if it could not be delivered.
    pub fn report(self, error: E) {
        let index = self.index;
        if self.try_report(error).is_err() {
            warn!(
                target: "txnmgr::episode",
                participant = index,
                "Error reported after episode teardown was dropped"
            );
        }
    }
}

/// Everything a participant receives at open time.
#[derive(Debug)]
pub struct TxnContext<E> {
    /// Position of this participant in the episode
    pub index: usize,
    /// Setup-complete signal
    pub start: StartSignal,
    /// Episode outcome, delivered once
    pub inbound: OutcomeReceiver<E>,
    /// Channel for this participant's own failure
    pub outbound: ErrorSender<E>,
}

/// A transaction participant.
///
/// Implemented for every `FnOnce(TxnContext<E>) + Send + 'static` closure;
/// implement it directly for participants that carry their own state.
pub trait TxnFn<E>: Send + 'static {
    /// Run the participant to completion
    fn call(self: Box<Self>, ctx: TxnContext<E>);
}

impl<E, F> TxnFn<E> for F
where
    F: FnOnce(TxnContext<E>) + Send + 'static,
{
    fn call(self: Box<Self>, ctx: TxnContext<E>) {
        (*self)(ctx)
    }
}

/// Type-erased participant as accepted by the manager.
pub type BoxedTxnFn<E> = Box<dyn TxnFn<E>>;

/// Box a closure as a participant.
pub fn txn_fn<E, F>(f: F) -> BoxedTxnFn<E>
where
    E: 'static,
    F: FnOnce(TxnContext<E>) + Send + 'static,
{
    Box::new(f)
}
