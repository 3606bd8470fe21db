//! Pre-mutation byte capture, per-operation inverse logs, and commit/rollback
//! for file-mutating tool calls.

mod persist;
mod store;

pub use store::{RollbackOutcome, SnapshotStore};
