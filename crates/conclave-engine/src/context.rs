//! What a running stage sees, and what it hands back.
//!
//! A stage never mutates `WorkflowState` directly. It reads an immutable
//! snapshot through `StageContext` and collects its side effects (errors,
//! warnings, trace records, counter bumps) in a `StageEffect` that the engine
//! applies after the stage finishes. The partial update is merged last.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use conclave_contracts::{
    capability::Capability,
    error::{AgentError, ConclaveError, ConclaveResult},
    state::{ErrorRecord, PartialUpdate, Stage, WarningKind, WarningRecord, WorkflowState},
    trace::{StageOutcome, StageRecord},
    view::{StateView, CURRENT_CONTEXT, CURRENT_ITEM, CURRENT_ITEM_ID},
};
use conclave_core::{Agent, AgentRegistry};
use conclave_policy::{PartialFailurePolicy, WorkflowPolicy};

use crate::fanout::{run_bounded, FanOutResult, FanOutTask};

/// A stage body supplied from outside the engine, such as the competitive
/// ranking protocol.
#[async_trait]
pub trait StageProcedure: Send + Sync {
    fn name(&self) -> &str;

    /// Fields the procedure may write.
    fn outputs(&self) -> Vec<String>;

    /// Capabilities the procedure resolves agents for. Used by definition
    /// validation to check agent timeouts against the stage timeout.
    fn capabilities(&self) -> Vec<Capability>;

    async fn execute(&self, ctx: &mut StageContext<'_>) -> ConclaveResult<PartialUpdate>;
}

/// Side effects collected while a stage runs.
#[derive(Debug, Default)]
pub struct StageEffect {
    pub errors: Vec<ErrorRecord>,
    pub warnings: Vec<WarningRecord>,
    pub records: Vec<StageRecord>,
    pub counters: Vec<String>,
    /// Latest failure per stage; `None` clears a previous failure.
    pub stage_failures: Vec<(Stage, Option<AgentError>)>,
}

pub struct StageContext<'a> {
    stage: Stage,
    /// Stage that agent failures are attributed to. Differs from `stage`
    /// only when Retry re-runs another stage's action.
    failure_stage: Stage,
    state: Arc<WorkflowState>,
    registry: &'a AgentRegistry,
    policy: &'a WorkflowPolicy,
    business_unit: Option<&'a str>,
    effect: StageEffect,
}

impl<'a> StageContext<'a> {
    pub fn new(
        stage: Stage,
        state: Arc<WorkflowState>,
        registry: &'a AgentRegistry,
        policy: &'a WorkflowPolicy,
        business_unit: Option<&'a str>,
    ) -> Self {
        Self {
            stage,
            failure_stage: stage,
            state,
            registry,
            policy,
            business_unit,
            effect: StageEffect::default(),
        }
    }

    /// Attribute agent failures to `stage` instead of the running stage.
    pub fn attribute_failures_to(mut self, stage: Stage) -> Self {
        self.failure_stage = stage;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        self.policy
    }

    pub fn registry(&self) -> &AgentRegistry {
        self.registry
    }

    /// A view of the stage's snapshot with no overlay.
    pub fn view(&self) -> StateView {
        StateView::new(Arc::clone(&self.state))
    }

    /// A view focused on one entity: the entity is the current item and its
    /// research context, if any, is overlaid.
    pub fn entity_view(&self, entity: &str) -> StateView {
        let view = self
            .view()
            .with(CURRENT_ITEM, Value::String(entity.to_string()))
            .with(CURRENT_ITEM_ID, Value::String(entity.to_string()));
        match self.state.research_context(entity) {
            Some(context) => view.with(CURRENT_CONTEXT, Value::String(context.to_string())),
            None => view,
        }
    }

    /// Enabled agents for `capability`, possibly empty.
    pub fn resolve(&self, capability: Capability) -> Vec<Agent> {
        self.registry.resolve(capability, self.business_unit)
    }

    /// Like `resolve`, but an empty result is `NoAgentForCapability`.
    pub fn require_agents(&self, capability: Capability) -> ConclaveResult<Vec<Agent>> {
        let agents = self.resolve(capability);
        if agents.is_empty() {
            return Err(ConclaveError::NoAgentForCapability { capability });
        }
        Ok(agents)
    }

    /// Run `tasks` concurrently under the policy's limits and record each
    /// invocation.
    ///
    /// Failed items are recorded as errors and returned with an `Err`
    /// result. Under `PartialFailurePolicy::AbortStage` the first failure
    /// aborts the remaining tasks and is returned as `ConclaveError::Agent`.
    pub async fn fan_out(&mut self, tasks: Vec<FanOutTask>) -> ConclaveResult<Vec<FanOutResult>> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let abort = self.policy.engine.partial_failure == PartialFailurePolicy::AbortStage;
        let results = run_bounded(tasks, self.policy.engine.max_concurrency, abort).await;

        let mut latest_failure = None;
        for r in &results {
            self.record_invocation(r);
            if let Err(e) = &r.result {
                if abort {
                    self.effect.stage_failures.push((self.failure_stage, Some(e.clone())));
                    return Err(ConclaveError::Agent {
                        agent_id: r.agent_id.to_string(),
                        source: e.clone(),
                    });
                }
                latest_failure = Some(e.clone());
            }
        }
        self.effect.stage_failures.push((self.failure_stage, latest_failure));
        Ok(results)
    }

    fn record_invocation(&mut self, r: &FanOutResult) {
        let item = Some(r.key.as_str()).filter(|k| *k != r.agent_id.as_str());
        let outcome = match &r.result {
            Ok(update) => StageOutcome::Updated {
                fields: update.keys().cloned().collect(),
            },
            Err(e) => {
                warn!(
                    stage = %self.stage,
                    agent_id = %r.agent_id,
                    item = %r.key,
                    error = %e,
                    "agent invocation failed"
                );
                self.effect
                    .errors
                    .push(ErrorRecord::agent(self.stage, &r.agent_id, item, e));
                StageOutcome::Failed {
                    message: e.message.clone(),
                    retryable: e.retryable,
                }
            }
        };
        self.effect.records.push(StageRecord::invocation(
            self.stage,
            &r.agent_id,
            item,
            outcome,
            r.elapsed_ms,
        ));
    }

    pub fn warn(&mut self, kind: WarningKind, message: impl Into<String>) {
        let message = message.into();
        warn!(stage = %self.stage, kind = ?kind, %message, "stage warning");
        self.effect.warnings.push(WarningRecord {
            stage: self.stage,
            kind,
            message,
        });
    }

    pub fn record_error(&mut self, record: ErrorRecord) {
        self.effect.errors.push(record);
    }

    /// Increment a named run counter when the stage's effects are applied.
    pub fn bump(&mut self, counter: &str) {
        self.effect.counters.push(counter.to_string());
    }

    pub(crate) fn into_effect(self) -> StageEffect {
        self.effect
    }
}
