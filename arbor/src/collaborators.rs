//! Contracts for the external collaborators the step engine consults.
//!
//! The engine treats every call as an opaque blocking operation. Errors abort
//! the current iteration and are returned to whoever drives the loop; nothing
//! here retries. [`crate::io::command::CommandCollaborator`] implements all of
//! them by talking to an external process, and tests use the scripted
//! implementations in `test_support`.

use anyhow::Result;

use crate::core::tree::TaskNode;
use crate::core::types::{Candidate, ChildSpec, PhaseLabel, Status, ValueLabel, Verdict};

/// Splits a task into child specs. An empty list marks the task terminal.
pub trait Divider {
    fn divide(&self, node: &TaskNode) -> Result<Vec<ChildSpec>>;
}

/// Classifies a task as simple, complex or failed.
pub trait Conqueror {
    fn conquer(&self, node: &TaskNode) -> Result<Verdict>;
}

/// Gets a chance to recover a failed node before the walk stops.
pub trait Rescuer {
    /// `Some(status)` replaces the failure; `None` leaves it in place.
    fn rescue(&self, node: &TaskNode) -> Result<Option<Status>>;
}

/// Scores thought content, either one label at a time or by voting.
pub trait Evaluator {
    fn value(&self, content: &str) -> Result<ValueLabel>;

    /// Index into `candidates` of the preferred one.
    fn vote(&self, candidates: &[String]) -> Result<usize>;
}

/// Input for a [`Generator`] call.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub task: &'a str,
    /// Materialized context (thought path or merged inputs).
    pub content: &'a str,
    /// Graph phase the request belongs to; `None` for tree search.
    pub phase: Option<PhaseLabel>,
    /// Number of candidates wanted.
    pub count: usize,
}

/// Proposes successor candidates for a node.
pub trait Generator {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Vec<Candidate>>;
}

/// Everything a step may need, in one bound.
pub trait Collaborators: Divider + Conqueror + Rescuer + Evaluator + Generator {}

impl<T> Collaborators for T where T: Divider + Conqueror + Rescuer + Evaluator + Generator {}
