//! Running a whole workflow as a single sub-workflow agent.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use conclave_contracts::{
    error::AgentError,
    state::{RunStatus, WorkflowState},
};
use conclave_core::{traits::NestedWorkflow, AgentRegistry};

use crate::{definition::WorkflowDefinition, engine::WorkflowEngine};

/// A definition bound to a registry, invocable as a `NestedWorkflow`.
///
/// The nested run gets a fresh state built from the mapped inputs and
/// returns its working fields. A nested run that ends in `Failed` is an
/// execution error of the outer agent.
pub struct CompiledWorkflow {
    definition: Arc<WorkflowDefinition>,
    engine: WorkflowEngine,
}

impl CompiledWorkflow {
    pub fn new(definition: Arc<WorkflowDefinition>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            definition,
            engine: WorkflowEngine::new(registry),
        }
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }
}

#[async_trait]
impl NestedWorkflow for CompiledWorkflow {
    async fn run_nested(
        &self,
        inputs: BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, AgentError> {
        let state = WorkflowState::from_inputs(inputs);
        let finished = self
            .engine
            .run(state, &self.definition)
            .await
            .map_err(|e| AgentError::execution(format!("nested workflow '{}': {e}", self.definition.name)))?;

        if let RunStatus::Failed { stage, cause } = finished.status() {
            return Err(AgentError::execution(format!(
                "nested workflow '{}' failed at {stage}: {cause}",
                self.definition.name
            )));
        }

        debug!(workflow = %self.definition.name, "nested workflow completed");
        Ok(finished
            .working_fields()
            .map(|(k, f)| (k.clone(), f.value.clone()))
            .collect())
    }
}
