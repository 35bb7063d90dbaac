//! The adapter layer: one invocation signature for every execution model.
//!
//! Every call to `Agent::invoke` runs the same guarded pipeline:
//!
//!   Enabled → Required inputs → [dispatch under timeout, panics caught] → Output shape
//!
//! `invoke` never panics and never returns anything but a partial update or
//! an `AgentError`. The engine decides what an error means for the stage.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use conclave_contracts::{
    agent::{AgentDescriptor, AgentId},
    error::{AgentError, ConclaveError, ConclaveResult},
    state::PartialUpdate,
    view::StateView,
};

use crate::unit::{RawAgentUnit, SubWorkflowUnit, ToolChain};

/// An adapted, invocable agent.
///
/// Cheap to clone: the descriptor and body are shared. The registry hands out
/// clones so fan-out tasks can own their agent.
#[derive(Clone)]
pub struct Agent {
    descriptor: Arc<AgentDescriptor>,
    unit: RawAgentUnit,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.descriptor.id)
            .field("execution_model", &self.descriptor.execution_model)
            .finish()
    }
}

/// Wrap `unit` behind the adapter its descriptor names.
///
/// Returns `ConclaveError::AdapterMismatch` when the unit's execution model
/// is not the one the descriptor declares.
pub fn adapt(descriptor: AgentDescriptor, unit: RawAgentUnit) -> ConclaveResult<Agent> {
    let actual = unit.model();
    if actual != descriptor.execution_model {
        return Err(ConclaveError::AdapterMismatch {
            agent_id: descriptor.id.to_string(),
            expected: descriptor.execution_model,
            actual,
        });
    }
    Ok(Agent {
        descriptor: Arc::new(descriptor),
        unit,
    })
}

impl Agent {
    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> &AgentId {
        &self.descriptor.id
    }

    /// Invoke the agent against `view`.
    ///
    /// # Pipeline
    ///
    /// 1. A disabled agent fails without running.
    /// 2. Every declared required input must be present (non-null) in the view.
    /// 3. The body runs under the descriptor timeout; a panic becomes
    ///    `AgentErrorKind::Panicked`.
    /// 4. The result must be an object writing only declared output keys.
    pub async fn invoke(&self, view: StateView) -> Result<PartialUpdate, AgentError> {
        let agent_id = &self.descriptor.id;

        // ── Step 1: Enabled check ────────────────────────────────────────────
        if !self.descriptor.enabled {
            return Err(AgentError::execution(format!("agent '{agent_id}' is disabled")));
        }

        // ── Step 2: Required inputs ──────────────────────────────────────────
        let missing: Vec<String> = self
            .descriptor
            .required_inputs
            .iter()
            .filter(|field| !view.has(field))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warn!(agent_id = %agent_id, missing = ?missing, "required inputs absent");
            return Err(AgentError::missing_input(&missing));
        }

        // ── Step 3: Dispatch under timeout ───────────────────────────────────
        let timeout = self.descriptor.timeout;
        let body = AssertUnwindSafe(self.dispatch(view)).catch_unwind();
        let raw = match tokio::time::timeout(timeout, body).await {
            Err(_) => {
                warn!(agent_id = %agent_id, timeout_ms = timeout.as_millis() as u64, "agent timed out");
                return Err(AgentError::timeout(format!(
                    "agent '{agent_id}' exceeded its {}ms timeout",
                    timeout.as_millis()
                )));
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                warn!(agent_id = %agent_id, panic = %message, "agent panicked");
                return Err(AgentError::panicked(format!("agent '{agent_id}' panicked: {message}")));
            }
            Ok(Ok(result)) => result?,
        };

        // ── Step 4: Output shape ─────────────────────────────────────────────
        let update = self.check_output(raw)?;
        debug!(agent_id = %agent_id, fields = ?update.keys().collect::<Vec<_>>(), "agent invocation succeeded");
        Ok(update)
    }

    async fn dispatch(&self, view: StateView) -> Result<Value, AgentError> {
        match &self.unit {
            RawAgentUnit::Function(f) => f(view).await,
            RawAgentUnit::ToolAugmented(chain) => run_tool_chain(chain, &view).await,
            RawAgentUnit::SubWorkflow(unit) => run_sub_workflow(unit, &view).await,
        }
    }

    fn check_output(&self, raw: Value) -> Result<PartialUpdate, AgentError> {
        let Value::Object(map) = raw else {
            return Err(AgentError::malformed(format!(
                "agent '{}' returned a non-object output",
                self.descriptor.id
            )));
        };

        let undeclared: Vec<&String> = map
            .keys()
            .filter(|k| !self.descriptor.output_keys.contains(*k))
            .collect();
        if !undeclared.is_empty() {
            return Err(AgentError::malformed(format!(
                "agent '{}' wrote undeclared fields: {:?}",
                self.descriptor.id, undeclared
            )));
        }

        Ok(map.into_iter().collect())
    }
}

// ── Execution-model adapters ──────────────────────────────────────────────────

async fn run_tool_chain(chain: &ToolChain, view: &StateView) -> Result<Value, AgentError> {
    let mut input = Map::new();
    input.insert(
        chain.input_key.clone(),
        view.get(&chain.input_key).cloned().unwrap_or(Value::Null),
    );
    input.insert(
        "tools".to_string(),
        Value::Array(chain.tools.iter().cloned().map(Value::String).collect()),
    );

    let result = chain.runnable.run(Value::Object(input)).await?;

    // A chain that returns a bare value (usually text) writes it under the
    // output key.
    Ok(match result {
        Value::Object(_) => result,
        other => {
            let mut wrapped = Map::new();
            wrapped.insert(chain.output_key.clone(), other);
            Value::Object(wrapped)
        }
    })
}

async fn run_sub_workflow(unit: &SubWorkflowUnit, view: &StateView) -> Result<Value, AgentError> {
    let inputs = unit
        .input_mapping
        .iter()
        .filter_map(|(outer, inner)| view.get(outer).map(|v| (inner.clone(), v.clone())))
        .collect();

    let outputs = unit.workflow.run_nested(inputs).await?;

    let mapped: Map<String, Value> = unit
        .output_mapping
        .iter()
        .filter_map(|(inner, outer)| outputs.get(inner).map(|v| (outer.clone(), v.clone())))
        .collect();
    Ok(Value::Object(mapped))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
