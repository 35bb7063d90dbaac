//! Trait seams of the orchestration core.
//!
//! - `ToolRunnable`: the body of a tool-augmented agent (an LLM chain)
//! - `NestedWorkflow`: the body of a sub-workflow agent
//! - `TraceSink`: optional external sink for stage records
//!
//! Plain-function agents need no trait: they are async closures wrapped by
//! `RawAgentUnit::function`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use conclave_contracts::{error::AgentError, error::ConclaveResult, trace::StageRecord};

/// A tool-augmented chain: receives one JSON input, may call tools, returns
/// one JSON value.
///
/// The adapter builds the input as `{input_key: <state field>, "tools": [...]}`
/// and maps the result back under the descriptor's output key.
#[async_trait]
pub trait ToolRunnable: Send + Sync {
    async fn run(&self, input: Value) -> Result<Value, AgentError>;
}

/// A workflow that can be invoked as a single agent.
///
/// Receives only the fields named in the sub-workflow unit's input mapping
/// and returns its own fields; the adapter maps them back.
#[async_trait]
pub trait NestedWorkflow: Send + Sync {
    async fn run_nested(
        &self,
        inputs: BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, AgentError>;
}

/// Receives every stage record of every run, in order.
///
/// Records written here are never modified or deleted by the engine.
pub trait TraceSink: Send + Sync {
    /// Append one record for `run_id`.
    fn write(&self, run_id: &str, record: &StageRecord) -> ConclaveResult<()>;

    /// Called once when the run reaches a terminal stage.
    fn finalize(&self, run_id: &str) -> ConclaveResult<()>;
}
