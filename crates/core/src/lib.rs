//! Core types for txnmgr
//!
//! This crate defines the pieces shared by the scheduler and the manager:
//! - ErrorList / Combined: aggregation of participant-reported errors
//! - ManagerConfig: TOML-backed manager configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;

pub use config::{ConfigError, ManagerConfig, DEFAULT_WORKER_NAME_PREFIX};
pub use error::{Combined, ErrorList};
