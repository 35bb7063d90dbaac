//! # conclave-engine
//!
//! The Conclave workflow engine: an explicit state machine over named
//! stages, each running agents resolved from the registry against a shared
//! `WorkflowState`.
//!
//! This crate provides:
//! - `WorkflowDefinition`, `StageDef`, `StageAction` and `Edge`, with the
//!   `standard` and `competitive` pipelines prebuilt
//! - `WorkflowEngine::run`, which validates the definition and drives a
//!   state to `Done` or `Failed`
//! - bounded concurrent fan-out with keyed, order-independent merges
//! - `StageProcedure`, the seam for stage bodies such as competitive ranking
//! - `CompiledWorkflow`, which runs a whole workflow as a sub-workflow agent
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conclave_engine::{WorkflowDefinition, WorkflowEngine};
//!
//! let definition = WorkflowDefinition::standard(policy);
//! let engine = WorkflowEngine::new(Arc::new(registry));
//! let state = engine.run(WorkflowState::new(["USA", "IND"]), &definition).await?;
//! ```

pub mod context;
pub mod definition;
pub mod engine;
pub mod fanout;
pub mod nested;
mod stages;

pub use context::{StageContext, StageEffect, StageProcedure};
pub use definition::{
    fields, Edge, EdgeFn, FanOut, OnMissing, Selection, StageAction, StageDef, WorkflowBuilder,
    WorkflowDefinition,
};
pub use engine::WorkflowEngine;
pub use fanout::{FanOutResult, FanOutTask};
pub use nested::CompiledWorkflow;

// ── Tests ─────────────────────────────────────────────────────────────────────
