//! Deterministic, pure logic for traversal, search and reduction.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! snapshots and return deterministic outputs suitable for tests. Collaborator
//! calls happen in [`crate::step`]; the core only consumes their typed output.

pub mod dnc;
pub mod error;
pub mod graph;
pub mod invariants;
pub mod search;
pub mod snapshot;
pub mod tree;
pub mod types;
