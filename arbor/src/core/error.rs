//! Error conditions raised by the core.

use thiserror::Error;

use crate::core::types::NodeId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("tree already has a root; node needs a parent")]
    MultipleRoots,

    #[error("invalid structure: {0}")]
    InvalidStructure(String),

    #[error("graph node needs at least one predecessor")]
    MissingPredecessor,

    /// Collaborator output could not be parsed or violated its contract.
    #[error("invalid generation: {0}")]
    InvalidGeneration(String),

    #[error("session '{0}' has no snapshot and no seed was provided")]
    SessionNotSeeded(String),

    #[error("snapshot holds a {found} structure, expected {expected}")]
    StructureMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;
