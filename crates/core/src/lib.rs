//! The agent execution core: the RVR-B turn executor and everything it
//! leans on to decide what to do next (error classification, backtrack
//! escalation, adaptive termination, tool dispatch, intent analysis). The
//! session-owning façade that wires a [`RVRBExecutor`] run to a particular
//! conversation lives one layer up, in `sa-sessions`, since it also needs
//! to own the session table this crate has no opinion about.

pub mod backtrack;
pub mod classifier;
pub mod executor;
pub mod intent;
pub mod terminator;
pub mod tool_executor;

pub use backtrack::BacktrackManager;
pub use classifier::{ErrorClassifier, FailureSignal};
pub use executor::{ExecutorDeps, RVRBExecutor, TurnOutcome};
pub use intent::IntentAnalyzer;
pub use terminator::{AdaptiveTerminator, HaltDecision, TerminatorConfig, TerminationInputs};
pub use tool_executor::{ToolExecutor, ToolHandler, ToolRegistry};
