//! Database handles, per-module connection resolution, and the
//! distributed-lock abstraction the Migration Runner builds on.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod handle;
mod lock;
mod manager;

pub use handle::DbHandle;
pub use lock::{DbLock, DistributedLock, InProcessLock, LockGuard};
pub use manager::DbManager;

pub use sea_orm;
