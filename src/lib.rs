//! txnmgr - coordinated commit/rollback around a business operation
//!
//! A [`TransactionManager`] runs a business function while a set of
//! participants execute concurrently around it. Every participant finishes
//! its setup before the business function starts, then learns the outcome
//! and commits or rolls back.
//!
//! # Quick Start
//!
//! ```
//! use txnmgr::{txn_fn, TransactionManager, TxnContext};
//!
//! let manager = TransactionManager::new();
//!
//! let ledger = txn_fn(|ctx: TxnContext<String>| {
//!     // acquire resources ...
//!     ctx.start.started();
//!     match ctx.inbound.recv() {
//!         Some(Ok(())) => { /* commit */ }
//!         _ => { /* roll back */ }
//!     }
//! });
//!
//! let result = manager.run(|| Ok(()), vec![ledger]);
//! assert!(result.is_ok());
//! ```
//!
//! # Architecture
//!
//! - `txnmgr-core`: error aggregation and configuration
//! - `txnmgr-scheduler`: bounded worker pool, one worker per participant
//! - `txnmgr-concurrency`: the manager and the participant contract

pub use txnmgr_concurrency::*;
pub use txnmgr_core::{Combined, ConfigError, ErrorList, ManagerConfig, DEFAULT_WORKER_NAME_PREFIX};
pub use txnmgr_scheduler::{BoundedScheduler, SchedulerError, SchedulerStats};
