//! Partial re-harvest support
//!
//! A persisted shard ledger with atomic writes and file locking.

pub mod ledger;

pub use ledger::{LedgerScope, ResumeError, ResumePlan, ShardLedger};
