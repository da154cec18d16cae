//! Concurrent, instance-keyed state machine engine (spec §4.G): guards,
//! pre/post-transition hooks, bounded auto-transform chains, and an
//! LRU-cached view over a pluggable persistence port.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod definition;
mod engine;
mod hooks;
mod instance;

pub use definition::{Definition, Guard, StateDef, TransitionDef, AUTO_TRANSFORM_LIMIT};
pub use engine::{StateMachineEngine, TransitionError, TransitionEvent};
pub use hooks::{HookBucket, HookContext, TransitionHook};
pub use instance::{HistoryEntry, InMemoryInstanceStore, Instance, InstanceFilter, InstanceId, InstanceStore};
