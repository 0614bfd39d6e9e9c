//! Participant coordination for txnmgr
//!
//! This crate implements the episode protocol:
//! - TransactionManager: runs a business function inside a set of participants
//! - TxnFn / TxnContext: the participant contract
//! - Latch: countdown barrier behind the started and finished phases
//! - RunError: business vs participant failure reporting

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod latch;
pub mod manager;
pub mod txn;

pub use error::RunError;
pub use latch::Latch;
pub use manager::{ManagerMetrics, TransactionManager};
pub use txn::{
    txn_fn, BoxedTxnFn, ErrorSender, Outcome, OutcomeReceiver, StartSignal, TxnContext, TxnFn,
};
