//! System prompt assembly: per-turn injector pipeline plus the lower-level
//! workspace-file truncation/formatting helpers it builds on.

pub mod builder;
pub mod injection;
pub mod injector;
pub mod report;
pub mod truncation;

pub use builder::{ContextPackBuilder, SessionMode, WorkspaceFile};
pub use injector::{compose, InjectorInput};
pub use report::ContextReport;
