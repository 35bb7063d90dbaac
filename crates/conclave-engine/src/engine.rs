//! The workflow engine: the deterministic stage runner.
//!
//! Every stage runs the same loop:
//!
//!   Enter → Requires → [action under stage timeout] → Effects → Merge → Edge → Trace
//!
//! The engine owns the `WorkflowState` for the whole run. Stages see an
//! immutable snapshot and hand back a partial update plus their side
//! effects; nothing reaches the state until the stage has finished, so no
//! stage ever reads a partially merged predecessor.

use std::{sync::Arc, time::Instant};

use tracing::{debug, error, info, warn};

use conclave_contracts::{
    error::{ConclaveError, ConclaveResult},
    state::{ErrorRecord, Stage, WorkflowState},
    trace::StageRecord,
};
use conclave_core::{traits::TraceSink, AgentRegistry};

use crate::{
    context::{StageContext, StageEffect},
    definition::{StageAction, StageDef, WorkflowDefinition},
    stages::run_action,
};

/// Runs workflow definitions against a shared, read-only registry.
///
/// One engine can serve many concurrent runs: each run owns its own state.
#[derive(Clone)]
pub struct WorkflowEngine {
    registry: Arc<AgentRegistry>,
    sink: Option<Arc<dyn TraceSink>>,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry, sink: None }
    }

    /// Forward every stage record to `sink` as well as the run metadata.
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Drive `initial` through `definition` until a terminal stage.
    ///
    /// # Errors
    ///
    /// - `InvalidWorkflow` / `Config` if the definition fails validation;
    ///   no agent has run.
    /// - `StructuralViolation` if a stage broke a state invariant.
    ///
    /// Every other failure, including validation of the inputs, ends in
    /// `RunStatus::Failed` on the returned state with the cause in its
    /// error list.
    pub async fn run(
        &self,
        initial: WorkflowState,
        definition: &WorkflowDefinition,
    ) -> ConclaveResult<WorkflowState> {
        definition.validate(&self.registry)?;

        let mut state = initial;
        let run_id = state.run_id().to_string();
        let limit = definition.policy.engine.max_transitions;
        let mut transitions = 0u32;
        let mut current = definition.initial;

        info!(
            run_id = %run_id,
            workflow = %definition.name,
            entities = state.entities().len(),
            "workflow run starting"
        );

        loop {
            state.enter(current);
            if current.is_terminal() {
                break;
            }

            if transitions >= limit {
                let err = ConclaveError::TransitionLimit { limit };
                error!(run_id = %run_id, stage = %current, limit, "transition limit reached");
                state.record_error(ErrorRecord::from_error(current, &err));
                state.fail(current, err.to_string());
                current = Stage::Failed;
                continue;
            }
            transitions += 1;

            let Some(def) = definition.stage(current) else {
                // validate() guarantees reachable stages are defined, but a
                // custom edge can still point anywhere.
                let err = ConclaveError::InvalidWorkflow {
                    reason: format!("stage {current} is not defined"),
                };
                state.record_error(ErrorRecord::from_error(current, &err));
                state.fail(current, err.to_string());
                current = Stage::Failed;
                continue;
            };

            let started = Instant::now();
            let next = match self.execute_stage(def, &mut state, definition).await {
                Ok(()) if state.is_failed() => Stage::Failed,
                Ok(()) => def.edge.next(&state),
                Err(err @ ConclaveError::StructuralViolation { .. }) => {
                    error!(run_id = %run_id, stage = %current, error = %err, "structural violation, aborting run");
                    self.finalize(&run_id);
                    return Err(err);
                }
                Err(err) => {
                    warn!(run_id = %run_id, stage = %current, error = %err, "stage failed");
                    state.record_error(ErrorRecord::from_error(current, &err));
                    state.fail(current, err.to_string());
                    Stage::Failed
                }
            };
            if next == Stage::Failed {
                state.fail(current, format!("stage {current} routed the run to failed"));
            }

            debug!(run_id = %run_id, from = %current, to = %next, "transition");
            let record = StageRecord::transition(current, next, started.elapsed().as_millis() as u64);
            self.emit(&mut state, &run_id, record);
            current = next;
        }

        state.complete();
        self.finalize(&run_id);
        info!(
            run_id = %run_id,
            status = ?state.status(),
            errors = state.errors().len(),
            warnings = state.warnings().len(),
            "workflow run finished"
        );
        Ok(state)
    }

    async fn execute_stage(
        &self,
        def: &StageDef,
        state: &mut WorkflowState,
        definition: &WorkflowDefinition,
    ) -> ConclaveResult<()> {
        let missing: Vec<&str> = def
            .requires
            .iter()
            .filter(|f| !state.has(f))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(ConclaveError::Validation {
                reason: format!("stage {} requires absent fields: {}", def.stage, missing.join(", ")),
            });
        }

        let snapshot = Arc::new(state.clone());
        let mut ctx = StageContext::new(
            def.stage,
            snapshot,
            &self.registry,
            &definition.policy,
            definition.business_unit.as_deref(),
        );
        if let StageAction::Retry { target } = &def.action {
            ctx = ctx.attribute_failures_to(*target);
        }

        let timeout = definition.policy.stage_timeout();
        let result = tokio::time::timeout(timeout, run_action(&def.action, &mut ctx, definition)).await;

        // Effects gathered before a timeout are kept: they describe
        // invocations that did complete.
        let run_id = state.run_id().to_string();
        self.apply_effect(state, &run_id, ctx.into_effect());

        match result {
            Err(_) => Err(ConclaveError::StageTimeout {
                stage: def.stage,
                timeout_secs: definition.policy.engine.stage_timeout_secs,
            }),
            Ok(Err(err)) => Err(err),
            Ok(Ok(update)) => state.merge(def.stage, update),
        }
    }

    fn apply_effect(&self, state: &mut WorkflowState, run_id: &str, effect: StageEffect) {
        let StageEffect {
            errors,
            warnings,
            records,
            counters,
            stage_failures,
        } = effect;

        for record in records {
            self.emit(state, run_id, record);
        }
        for record in errors {
            state.record_error(record);
        }
        for record in warnings {
            state.record_warning(record);
        }
        for name in counters {
            state.bump_counter(&name);
        }
        for (stage, failure) in stage_failures {
            state.set_stage_failure(stage, failure);
        }
    }

    /// Append to the run trace and forward to the sink. A sink failure is
    /// logged and does not fail the run.
    fn emit(&self, state: &mut WorkflowState, run_id: &str, record: StageRecord) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.write(run_id, &record) {
                warn!(run_id = %run_id, error = %e, "trace sink write failed");
            }
        }
        state.record_trace(record);
    }

    fn finalize(&self, run_id: &str) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.finalize(run_id) {
                warn!(run_id = %run_id, error = %e, "trace sink finalize failed");
            }
        }
    }
}
