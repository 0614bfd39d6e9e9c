//! Transaction manager for coordinating participants around a business operation
//!
//! ## Episode Sequence
//!
//! ```text
//! 1. Create a scheduler with one worker per participant
//! 2. Create the shared outbound error channel (buffer = participant count)
//! 3. Open each participant with its own 1-slot inbound channel
//! 4. Wait for every participant to signal started      (barrier A)
//! 5. Call the business function on the caller's thread
//! 6. Send the outcome to each inbound channel, then close it
//! 7. Wait for every participant to return              (barrier B)
//! 8. Close the outbound channel
//! 9. Drain the outbound channel into an ErrorList
//! 10. Shut down the scheduler
//! 11. Business error if any, else the combined participant errors
//! ```
//!
//! Step 9 always runs, including after a business failure; the drained
//! errors are then discarded.
//!
//! If the business function panics, the episode is torn down during
//! unwinding: inbound channels close without a value, participants observe
//! `None` and roll back, and the scheduler is joined before the panic
//! continues to the caller.

use crate::error::RunError;
use crate::latch::Latch;
use crate::txn::{BoxedTxnFn, ErrorSender, Outcome, OutcomeReceiver, StartSignal, TxnContext};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use tracing::{debug, warn};
use txnmgr_core::{ConfigError, ErrorList, ManagerConfig};
use txnmgr_scheduler::{BoundedScheduler, SchedulerError};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Snapshot of manager counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerMetrics {
    /// Episodes that passed validation and began opening participants
    pub episodes_started: u64,
    /// Episodes that ran to teardown (successfully or not)
    pub episodes_completed: u64,
    /// Episodes whose business function failed
    pub business_failures: u64,
    /// Episodes where the business function succeeded but participants reported errors
    pub participant_failures: u64,
}

/// Runs business operations inside a set of transaction participants.
///
/// The manager holds no per-episode state between calls; everything an
/// episode needs is created inside [`run`](Self::run) and torn down before
/// it returns. Calls to `run` on the same manager are serialized.
///
/// # Memory Ordering
///
/// Metric counters use Relaxed ordering. They are observational only and
/// do not synchronize any other memory.
pub struct TransactionManager {
    id: u64,
    config: ManagerConfig,
    /// Serializes episodes
    lock: Mutex<()>,
    next_episode: AtomicU64,
    episodes_started: AtomicU64,
    episodes_completed: AtomicU64,
    business_failures: AtomicU64,
    participant_failures: AtomicU64,
}

impl TransactionManager {
    /// Create a manager with the default configuration
    pub fn new() -> Self {
        Self::build(ManagerConfig::default())
    }

    /// Create a manager with the given configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the configuration fails validation.
    pub fn with_config(config: ManagerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ManagerConfig) -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            config,
            lock: Mutex::new(()),
            next_episode: AtomicU64::new(1),
            episodes_started: AtomicU64::new(0),
            episodes_completed: AtomicU64::new(0),
            business_failures: AtomicU64::new(0),
            participant_failures: AtomicU64::new(0),
        }
    }

    /// Process-unique identifier of this manager, used in log fields
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Configuration this manager was built with
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Get current counters
    pub fn metrics(&self) -> ManagerMetrics {
        ManagerMetrics {
            episodes_started: self.episodes_started.load(Ordering::Relaxed),
            episodes_completed: self.episodes_completed.load(Ordering::Relaxed),
            business_failures: self.business_failures.load(Ordering::Relaxed),
            participant_failures: self.participant_failures.load(Ordering::Relaxed),
        }
    }

    /// Run `business` inside `participants`.
    ///
    /// `business` is called on the current thread, only after every
    /// participant has signaled started. Every participant then receives
    /// `business`'s result exactly once, and `run` returns only after
    /// every participant has returned.
    ///
    /// # Returns
    /// - `Ok(())` if `business` succeeded and no participant reported an error
    /// - `Err(RunError::Business(e))` with `business`'s error verbatim
    /// - `Err(RunError::Participants(_))` with every participant-reported error
    ///   (only when `business` succeeded)
    /// - `Err(RunError::TooManyParticipants { .. })` / `Err(RunError::Scheduler(_))`
    ///   if the episode could not be opened; `business` was not called
    ///
    /// # Error Type
    ///
    /// `E` must be `Clone` because every participant receives its own copy
    /// of the outcome. Error types that are not `Clone`, such as
    /// `std::io::Error` or `Box<dyn Error + Send + Sync>`, can be wrapped
    /// in `Arc`: run with `E = Arc<io::Error>` and map with `Arc::new`.
    ///
    /// # Liveness
    ///
    /// A participant that never signals started blocks this call forever.
    pub fn run<E, F, I>(&self, business: F, participants: I) -> Result<(), RunError<E>>
    where
        E: Clone + Send + 'static,
        F: FnOnce() -> Outcome<E>,
        I: IntoIterator<Item = BoxedTxnFn<E>>,
    {
        let participants: Vec<BoxedTxnFn<E>> = participants.into_iter().collect();
        let count = participants.len();

        if let Some(limit) = self.config.max_participants {
            if count > limit {
                return Err(RunError::TooManyParticipants {
                    requested: count,
                    limit,
                });
            }
        }

        let _guard = self.lock.lock();
        let episode_id = self.next_episode.fetch_add(1, Ordering::Relaxed);
        self.episodes_started.fetch_add(1, Ordering::Relaxed);

        debug!(
            target: "txnmgr::episode",
            manager_id = self.id,
            episode = episode_id,
            participants = count,
            "Episode opening"
        );

        let mut episode = match Episode::open(&self.config.worker_name_prefix, participants) {
            Ok(episode) => episode,
            Err(e) => {
                warn!(
                    target: "txnmgr::episode",
                    manager_id = self.id,
                    episode = episode_id,
                    error = %e,
                    "Episode failed to open"
                );
                self.episodes_completed.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        episode.started.wait();

        let outcome = business();

        episode.broadcast(&outcome);
        episode.finished.wait();
        let errors = episode.collect_errors();
        drop(episode);

        self.episodes_completed.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = outcome {
            self.business_failures.fetch_add(1, Ordering::Relaxed);
            debug!(
                target: "txnmgr::episode",
                manager_id = self.id,
                episode = episode_id,
                discarded = errors.len(),
                "Episode closed: business function failed"
            );
            return Err(RunError::Business(e));
        }

        match errors.into_result() {
            Ok(()) => {
                debug!(
                    target: "txnmgr::episode",
                    manager_id = self.id,
                    episode = episode_id,
                    "Episode closed: committed"
                );
                Ok(())
            }
            Err(combined) => {
                self.participant_failures.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: "txnmgr::episode",
                    manager_id = self.id,
                    episode = episode_id,
                    reported = combined.len(),
                    "Episode closed: participants reported errors"
                );
                Err(RunError::Participants(combined))
            }
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("metrics", &self.metrics())
            .finish()
    }
}

/// Per-call state of one `run`. Dropping it closes every inbound channel
/// that has not yet received an outcome, then joins the scheduler.
struct Episode<E> {
    scheduler: BoundedScheduler,
    outbound_tx: Option<SyncSender<E>>,
    outbound_rx: Receiver<E>,
    inbounds: Vec<SyncSender<Outcome<E>>>,
    started: Arc<Latch>,
    finished: Arc<Latch>,
}

impl<E: Clone + Send + 'static> Episode<E> {
    fn open(
        worker_name_prefix: &str,
        participants: Vec<BoxedTxnFn<E>>,
    ) -> Result<Self, SchedulerError> {
        let count = participants.len();
        let (outbound_tx, outbound_rx) = mpsc::sync_channel(count);

        let mut episode = Episode {
            scheduler: BoundedScheduler::new(count, worker_name_prefix)?,
            outbound_tx: Some(outbound_tx.clone()),
            outbound_rx,
            inbounds: Vec::with_capacity(count),
            started: Arc::new(Latch::new(count)),
            finished: Arc::new(Latch::new(count)),
        };

        for (index, txn) in participants.into_iter().enumerate() {
            episode.open_txn(index, txn, &outbound_tx)?;
        }

        Ok(episode)
    }

    fn open_txn(
        &mut self,
        index: usize,
        txn: BoxedTxnFn<E>,
        outbound: &SyncSender<E>,
    ) -> Result<(), SchedulerError> {
        let (inbound_tx, inbound_rx) = mpsc::sync_channel(1);
        let ctx = TxnContext {
            index,
            start: StartSignal::new(Arc::clone(&self.started), index),
            inbound: OutcomeReceiver::new(inbound_rx),
            outbound: ErrorSender::new(outbound.clone(), index),
        };
        let finished = FinishGuard(Arc::clone(&self.finished));

        self.scheduler.submit(move || {
            // Counts as finished even if the participant panics
            let _finished = finished;
            txn.call(ctx);
        })?;

        self.inbounds.push(inbound_tx);
        Ok(())
    }

    /// Deliver `outcome` to every participant and close each inbound channel.
    fn broadcast(&mut self, outcome: &Outcome<E>) {
        for (index, inbound) in self.inbounds.drain(..).enumerate() {
            if inbound.send(outcome.clone()).is_err() {
                warn!(
                    target: "txnmgr::episode",
                    participant = index,
                    "Participant exited before receiving the outcome"
                );
            }
        }
    }

    /// Close the outbound channel and take every buffered report.
    ///
    /// Must only be called after the finished barrier: every report has
    /// already been buffered, so a non-blocking drain sees all of them.
    fn collect_errors(&mut self) -> ErrorList<E> {
        self.outbound_tx = None;
        self.outbound_rx.try_iter().collect()
    }
}

impl<E> Drop for Episode<E> {
    fn drop(&mut self) {
        self.inbounds.clear();
        self.outbound_tx = None;
        self.scheduler.shutdown();
    }
}

struct FinishGuard(Arc<Latch>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.count_down();
    }
}
