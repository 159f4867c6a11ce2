//! Persistence layer for automation state.
//!
//! Everything the engine remembers between events goes through the
//! [`AutomationStore`] trait: rules, executed-rule records, thread
//! trackers, sender groups, the digest queue, and short-lived
//! processing markers. [`MemoryStore`] is the in-process backend.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{
    AutomationStore, DigestItem, ExecutedInsert, ExecutedRule, ExecutionStatus, Group,
    ThreadTracker, TrackerKind,
};
