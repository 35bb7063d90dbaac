//! Workflow definitions: stages, actions, and edges.
//!
//! A `WorkflowDefinition` is plain data plus a few trait objects. It is
//! checked against the registry by `validate` before any agent runs, so a
//! definition that could produce overlapping writes or outlive its stage
//! timeout never starts.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt,
    sync::Arc,
};

use tracing::debug;

use conclave_contracts::{
    capability::Capability,
    error::{ConclaveError, ConclaveResult},
    state::{Stage, WorkflowState},
};
use conclave_core::{Agent, AgentRegistry};
use conclave_policy::{VerifyOutcome, WorkflowPolicy};
use conclave_verify::InputValidator;

use crate::context::StageProcedure;

/// Field names written by the built-in stage actions.
pub mod fields {
    pub const LOCATIONS: &str = "locations";
    pub const METRICS: &str = "metrics";
    pub const ENTITY_METRICS: &str = "entity_metrics";
    pub const RANKING: &str = "ranking";
    pub const VERIFY_OUTCOME: &str = "verify_outcome";
    pub const VERIFICATION: &str = "verification";
    pub const DUAL_RECOMMENDATION: &str = "dual_recommendation";
    pub const INSIGHTS: &str = "insights";

    /// Counter bumped on every Verify evaluation.
    pub const VERIFY_EVALUATIONS: &str = "verify_evaluations";
    /// Counter bumped on every Retry.
    pub const RETRIES: &str = "retries";
}

/// Which resolved agents an Invoke stage uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The first agent in registration order.
    First,
    /// Every resolved agent. Their output sets must be disjoint.
    All,
}

/// What an Invoke stage fans out over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanOut {
    /// One invocation per selected agent; outputs merge flat.
    None,
    /// One invocation per target entity; outputs merge keyed by entity id.
    Entities,
    /// One invocation per element of a keyed field of arrays, such as
    /// `locations.{entity}[i]`; outputs merge keyed by element id.
    Field { field: String },
}

/// What an Invoke stage does when no agent provides the capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMissing {
    Fail,
    /// Record a `MissingAgent` warning and continue with no update.
    Skip,
}

/// The body of a stage.
#[derive(Clone)]
pub enum StageAction {
    /// Check run inputs with the definition's input validator.
    Validate,
    Invoke {
        capability: Capability,
        selection: Selection,
        fan_out: FanOut,
        on_missing: OnMissing,
    },
    /// Average numeric fields of a keyed field's values per `group_by` key.
    Aggregate {
        source: String,
        into: String,
        group_by: String,
    },
    /// Check `field` structurally and write `verify_outcome`. Agent failures
    /// recorded against `source` decide retryability.
    Verify { field: String, source: Stage },
    /// Re-run `target`'s action with the same inputs.
    Retry { target: Stage },
    /// Emit the top two candidates of the ranking side by side.
    DualRecommendation,
    Procedure(Arc<dyn StageProcedure>),
    Terminal,
}

impl fmt::Debug for StageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageAction::Validate => f.write_str("Validate"),
            StageAction::Invoke {
                capability,
                selection,
                fan_out,
                on_missing,
            } => f
                .debug_struct("Invoke")
                .field("capability", capability)
                .field("selection", selection)
                .field("fan_out", fan_out)
                .field("on_missing", on_missing)
                .finish(),
            StageAction::Aggregate { source, into, group_by } => f
                .debug_struct("Aggregate")
                .field("source", source)
                .field("into", into)
                .field("group_by", group_by)
                .finish(),
            StageAction::Verify { field, source } => f
                .debug_struct("Verify")
                .field("field", field)
                .field("source", source)
                .finish(),
            StageAction::Retry { target } => f.debug_struct("Retry").field("target", target).finish(),
            StageAction::DualRecommendation => f.write_str("DualRecommendation"),
            StageAction::Procedure(p) => f.debug_tuple("Procedure").field(&p.name()).finish(),
            StageAction::Terminal => f.write_str("Terminal"),
        }
    }
}

/// A pure function of the state choosing the next stage.
pub type EdgeFn = Arc<dyn Fn(&WorkflowState) -> Stage + Send + Sync>;

/// How a stage picks its successor.
#[derive(Clone)]
pub enum Edge {
    Always(Stage),
    /// Route on `verify_outcome`. `DegradedPass` follows `pass`; a missing
    /// or unreadable outcome follows `fail`.
    Verdict {
        pass: Stage,
        ambiguous: Stage,
        retry: Stage,
        fail: Stage,
    },
    Custom(EdgeFn),
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Always(s) => f.debug_tuple("Always").field(s).finish(),
            Edge::Verdict {
                pass,
                ambiguous,
                retry,
                fail,
            } => f
                .debug_struct("Verdict")
                .field("pass", pass)
                .field("ambiguous", ambiguous)
                .field("retry", retry)
                .field("fail", fail)
                .finish(),
            Edge::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Edge {
    /// Select the next stage. Reads nothing but `state`.
    pub fn next(&self, state: &WorkflowState) -> Stage {
        match self {
            Edge::Always(stage) => *stage,
            Edge::Verdict {
                pass,
                ambiguous,
                retry,
                fail,
            } => {
                let outcome = state
                    .field(fields::VERIFY_OUTCOME)
                    .cloned()
                    .and_then(|v| serde_json::from_value::<VerifyOutcome>(v).ok());
                match outcome {
                    Some(VerifyOutcome::Pass | VerifyOutcome::DegradedPass) => *pass,
                    Some(VerifyOutcome::Ambiguous) => *ambiguous,
                    Some(VerifyOutcome::Retry) => *retry,
                    Some(VerifyOutcome::Fail) | None => *fail,
                }
            }
            Edge::Custom(f) => f(state),
        }
    }

    /// Statically known targets. Custom edges have none.
    fn targets(&self) -> Vec<Stage> {
        match self {
            Edge::Always(stage) => vec![*stage],
            Edge::Verdict {
                pass,
                ambiguous,
                retry,
                fail,
            } => vec![*pass, *ambiguous, *retry, *fail],
            Edge::Custom(_) => Vec::new(),
        }
    }
}

/// One node of the state machine.
#[derive(Debug, Clone)]
pub struct StageDef {
    pub stage: Stage,
    pub action: StageAction,
    /// Fields that must be present (non-null) before the stage runs.
    pub requires: Vec<String>,
    pub edge: Edge,
}

impl StageDef {
    pub fn new(stage: Stage, action: StageAction, edge: Edge) -> Self {
        Self {
            stage,
            action,
            requires: Vec::new(),
            edge,
        }
    }

    pub fn requires(mut self, field: impl Into<String>) -> Self {
        self.requires.push(field.into());
        self
    }
}

/// A complete workflow: stages, edges, and the policy they run under.
pub struct WorkflowDefinition {
    pub name: String,
    pub initial: Stage,
    stages: BTreeMap<Stage, StageDef>,
    pub policy: WorkflowPolicy,
    validator: Arc<InputValidator>,
    /// Restricts agent resolution to one business unit.
    pub business_unit: Option<String>,
}

impl fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("initial", &self.initial)
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .field("business_unit", &self.business_unit)
            .finish()
    }
}

impl WorkflowDefinition {
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder {
            name: name.into(),
            initial: Stage::Validate,
            stages: BTreeMap::new(),
            policy: WorkflowPolicy::default(),
            validator: None,
            business_unit: None,
        }
    }

    /// Validate → LoadData → Analyze → Aggregate → Rank → Verify, then
    /// GenerateInsights on pass, DualRecommendation on ambiguity, Retry
    /// (back to Verify) while retryable, Failed otherwise.
    pub fn standard(policy: WorkflowPolicy) -> Self {
        Self::builder("standard")
            .policy(policy)
            .stage(StageDef::new(
                Stage::Validate,
                StageAction::Validate,
                Edge::Always(Stage::LoadData),
            ))
            .stage(StageDef::new(
                Stage::LoadData,
                invoke(Capability::DataLoad, FanOut::Entities, OnMissing::Fail),
                Edge::Always(Stage::Analyze),
            ))
            .stage(
                StageDef::new(
                    Stage::Analyze,
                    invoke(
                        Capability::Analysis,
                        FanOut::Field {
                            field: fields::LOCATIONS.to_string(),
                        },
                        OnMissing::Fail,
                    ),
                    Edge::Always(Stage::Aggregate),
                )
                .requires(fields::LOCATIONS),
            )
            .stage(
                StageDef::new(
                    Stage::Aggregate,
                    StageAction::Aggregate {
                        source: fields::METRICS.to_string(),
                        into: fields::ENTITY_METRICS.to_string(),
                        group_by: "entity".to_string(),
                    },
                    Edge::Always(Stage::Rank),
                )
                .requires(fields::METRICS),
            )
            .stage(
                StageDef::new(
                    Stage::Rank,
                    invoke(Capability::Ranking, FanOut::None, OnMissing::Fail),
                    Edge::Always(Stage::Verify),
                )
                .requires(fields::ENTITY_METRICS),
            )
            .with_verification_tail()
            .build()
    }

    /// Validate → Rank (the competitive ranking procedure) → Verify, with
    /// the same verification tail as `standard`.
    pub fn competitive(policy: WorkflowPolicy, procedure: Arc<dyn StageProcedure>) -> Self {
        Self::builder("competitive")
            .policy(policy)
            .stage(StageDef::new(
                Stage::Validate,
                StageAction::Validate,
                Edge::Always(Stage::Rank),
            ))
            .stage(StageDef::new(
                Stage::Rank,
                StageAction::Procedure(procedure),
                Edge::Always(Stage::Verify),
            ))
            .with_verification_tail()
            .build()
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageDef> {
        self.stages.get(&stage)
    }

    pub fn stages(&self) -> impl Iterator<Item = &StageDef> {
        self.stages.values()
    }

    /// Replace (or add) one stage definition.
    pub fn with_stage(mut self, def: StageDef) -> Self {
        self.stages.insert(def.stage, def);
        self
    }

    pub fn validator(&self) -> &InputValidator {
        &self.validator
    }

    pub fn with_validator(mut self, validator: InputValidator) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Check the definition against `registry` before any run.
    ///
    /// # Errors
    ///
    /// `InvalidWorkflow` when:
    /// - the initial stage or an edge target is undefined,
    /// - `Done` is unreachable from the initial stage,
    /// - a Retry target is missing or not an Invoke/Procedure stage,
    /// - a `Selection::All` stage resolves agents with overlapping outputs,
    /// - a resolved agent's timeout is not shorter than the stage timeout.
    pub fn validate(&self, registry: &AgentRegistry) -> ConclaveResult<()> {
        self.policy.validate()?;

        let defined = |s: &Stage| s.is_terminal() || self.stages.contains_key(s);
        if !defined(&self.initial) {
            return Err(invalid(format!("initial stage {} is not defined", self.initial)));
        }

        for def in self.stages.values() {
            for target in def.edge.targets() {
                if !defined(&target) {
                    return Err(invalid(format!(
                        "stage {} has an edge to undefined stage {target}",
                        def.stage
                    )));
                }
            }

            if let StageAction::Retry { target } = &def.action {
                match self.stages.get(target).map(|t| &t.action) {
                    Some(StageAction::Invoke { .. } | StageAction::Procedure(_)) => {}
                    _ => {
                        return Err(invalid(format!(
                            "retry stage {} targets {target}, which has no agent action",
                            def.stage
                        )))
                    }
                }
            }

            self.check_agents(def, registry)?;
        }
        if !self.reaches(Stage::Done) {
            return Err(invalid(format!("the done stage is unreachable from {}", self.initial)));
        }

        debug!(workflow = %self.name, stages = self.stages.len(), "workflow definition validated");
        Ok(())
    }

    /// Breadth-first search over edge targets from the initial stage. A
    /// reachable Custom edge may lead anywhere, so it counts as reaching
    /// `goal`. `Failed` needs no edge: any stage error routes there.
    fn reaches(&self, goal: Stage) -> bool {
        let mut seen = BTreeSet::from([self.initial]);
        let mut queue = VecDeque::from([self.initial]);
        while let Some(stage) = queue.pop_front() {
            if stage == goal {
                return true;
            }
            let Some(def) = self.stages.get(&stage) else {
                continue;
            };
            if matches!(def.edge, Edge::Custom(_)) {
                return true;
            }
            for target in def.edge.targets() {
                if seen.insert(target) {
                    queue.push_back(target);
                }
            }
        }
        false
    }

    fn check_agents(&self, def: &StageDef, registry: &AgentRegistry) -> ConclaveResult<()> {
        let bu = self.business_unit.as_deref();
        let (agents, selection): (Vec<Agent>, Selection) = match &def.action {
            StageAction::Invoke {
                capability, selection, ..
            } => (registry.resolve(*capability, bu), *selection),
            StageAction::Procedure(p) => (
                p.capabilities()
                    .into_iter()
                    .flat_map(|c| registry.resolve(c, bu))
                    .collect(),
                Selection::First,
            ),
            _ => return Ok(()),
        };

        let stage_timeout = self.policy.stage_timeout();
        for agent in &agents {
            if agent.descriptor().timeout >= stage_timeout {
                return Err(invalid(format!(
                    "agent '{}' timeout of {}ms is not shorter than the {}s timeout of stage {}",
                    agent.id(),
                    agent.descriptor().timeout.as_millis(),
                    self.policy.engine.stage_timeout_secs,
                    def.stage
                )));
            }
        }

        if selection == Selection::All {
            let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
            for agent in &agents {
                for key in &agent.descriptor().output_keys {
                    if let Some(other) = seen.insert(key.as_str(), agent.id().as_str()) {
                        return Err(invalid(format!(
                            "agents '{other}' and '{}' both write '{key}' in stage {}",
                            agent.id(),
                            def.stage
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn invoke(capability: Capability, fan_out: FanOut, on_missing: OnMissing) -> StageAction {
    StageAction::Invoke {
        capability,
        selection: Selection::First,
        fan_out,
        on_missing,
    }
}

fn invalid(reason: String) -> ConclaveError {
    ConclaveError::InvalidWorkflow { reason }
}

/// Builder for `WorkflowDefinition`.
pub struct WorkflowBuilder {
    name: String,
    initial: Stage,
    stages: BTreeMap<Stage, StageDef>,
    policy: WorkflowPolicy,
    validator: Option<InputValidator>,
    business_unit: Option<String>,
}

impl WorkflowBuilder {
    pub fn initial(mut self, stage: Stage) -> Self {
        self.initial = stage;
        self
    }

    pub fn stage(mut self, def: StageDef) -> Self {
        self.stages.insert(def.stage, def);
        self
    }

    pub fn policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use `validator` for the Validate stage instead of one built from the
    /// policy's entity bounds.
    pub fn validator(mut self, validator: InputValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn business_unit(mut self, business_unit: impl Into<String>) -> Self {
        self.business_unit = Some(business_unit.into());
        self
    }

    /// Verify → {GenerateInsights | DualRecommendation | Retry | Failed},
    /// DualRecommendation → GenerateInsights → Done.
    pub fn with_verification_tail(self) -> Self {
        self.stage(StageDef::new(
            Stage::Verify,
            StageAction::Verify {
                field: fields::RANKING.to_string(),
                source: Stage::Rank,
            },
            Edge::Verdict {
                pass: Stage::GenerateInsights,
                ambiguous: Stage::DualRecommendation,
                retry: Stage::Retry,
                fail: Stage::Failed,
            },
        ))
        .stage(StageDef::new(
            Stage::Retry,
            StageAction::Retry { target: Stage::Rank },
            Edge::Always(Stage::Verify),
        ))
        .stage(StageDef::new(
            Stage::DualRecommendation,
            StageAction::DualRecommendation,
            Edge::Always(Stage::GenerateInsights),
        ))
        .stage(StageDef::new(
            Stage::GenerateInsights,
            invoke(Capability::Explanation, FanOut::None, OnMissing::Skip),
            Edge::Always(Stage::Done),
        ))
    }

    pub fn build(self) -> WorkflowDefinition {
        let validator = self.validator.unwrap_or_else(|| {
            InputValidator::new(
                self.policy.validation.min_entities,
                self.policy.validation.max_entities,
            )
        });
        WorkflowDefinition {
            name: self.name,
            initial: self.initial,
            stages: self.stages,
            policy: self.policy,
            validator: Arc::new(validator),
            business_unit: self.business_unit,
        }
    }
}
