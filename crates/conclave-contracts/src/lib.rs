//! # conclave-contracts
//!
//! Shared types, the workflow state record, and error contracts for the
//! Conclave orchestration core.
//!
//! All crates in the workspace import from here. The only logic in this
//! crate is the invariant checking `WorkflowState::merge` performs.

pub mod agent;
pub mod capability;
pub mod error;
pub mod ranking;
pub mod state;
pub mod trace;
pub mod verify;
pub mod view;
