//! Errors returned by `TransactionManager::run`

use thiserror::Error;
use txnmgr_core::Combined;
use txnmgr_scheduler::SchedulerError;

/// Why an episode did not succeed.
///
/// A business failure always wins: when the business function fails, the
/// errors participants reported while rolling back are drained and dropped.
#[derive(Debug, Error)]
pub enum RunError<E> {
    /// The business function failed; carries its error verbatim
    #[error("{0}")]
    Business(E),

    /// The business function succeeded but one or more participants reported errors
    #[error("{0}")]
    Participants(Combined<E>),

    /// More participants were supplied than the manager is configured to accept.
    /// Nothing was started and the business function was not invoked.
    #[error("episode has {requested} participants, more than the configured limit of {limit}")]
    TooManyParticipants {
        /// Participants supplied
        requested: usize,
        /// Configured `max_participants`
        limit: usize,
    },

    /// Participants could not be scheduled. The business function was not invoked.
    #[error("failed to schedule participants: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl<E> RunError<E> {
    /// True if the business function itself failed
    pub fn is_business(&self) -> bool {
        matches!(self, RunError::Business(_))
    }

    /// The business function's error, if that is what this is
    pub fn into_business(self) -> Option<E> {
        match self {
            RunError::Business(e) => Some(e),
            _ => None,
        }
    }

    /// Errors reported by participants; empty for every other variant
    pub fn participant_errors(&self) -> &[E] {
        match self {
            RunError::Participants(combined) => combined.errors(),
            _ => &[],
        }
    }
}
