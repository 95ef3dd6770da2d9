//! Step-driven orchestration of recursive task decomposition and search.
//!
//! A session holds one structure (a divide-and-conquer task tree, a scored
//! thought tree, or a multi-predecessor task graph) in a serializable
//! [`core::snapshot::Snapshot`]. Each call to [`step::step`] advances it by one
//! iteration and reports whether the driver should stop.
//!
//! - **[`core`]**: Pure, deterministic structures and traversal rules. No I/O.
//! - **[`collaborators`]**: Traits for the external deciders (divide, conquer,
//!   rescue, evaluate, generate) a step consults.
//! - **[`io`]**: Side effects: config, snapshot files, audit logs, and the
//!   command-backed collaborator.
//!
//! Orchestration modules ([`step`], [`session`], [`start`], [`looping`]) tie
//! the core to a [`session::SnapshotStore`] and a set of collaborators.

pub mod collaborators;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod session;
pub mod start;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
