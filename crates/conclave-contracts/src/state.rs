//! The shared workflow state record.
//!
//! `WorkflowState` is the single record threaded through every stage of one
//! run. It is partitioned into:
//!
//! - **inputs** supplied by the caller before the run starts and never
//!   written afterwards,
//! - **working fields** produced by stages, each tagged with the stage that
//!   last wrote it and the JSON shape it was first populated with,
//! - an **extensions** bucket for caller keys the core does not know,
//! - **metadata**: errors, warnings, execution trace, iteration counters,
//!   the visited stage path, and the run status.
//!
//! Only the workflow engine mutates a state, by merging the partial update a
//! stage returned. Merges that would overwrite an input field or change the
//! shape of a populated working field are structural violations.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    agent::{AgentId, RunId},
    error::{AgentError, AgentErrorKind, ConclaveError, ConclaveResult},
    trace::StageRecord,
};

/// Field holding the list of target entity ids.
pub const ENTITIES: &str = "entities";
/// Optional free-text query supplied by the caller.
pub const QUERY: &str = "query";
/// Optional caller knobs as a JSON object.
pub const OPTIONS: &str = "options";
/// Externally supplied context, keyed by canonical entity id.
pub const RESEARCH_CONTEXT: &str = "research_context";

const INPUT_FIELDS: [&str; 4] = [ENTITIES, QUERY, OPTIONS, RESEARCH_CONTEXT];

/// A partial state update returned by an agent or stage: field name to value.
pub type PartialUpdate = BTreeMap<String, Value>;

// ── Stages ────────────────────────────────────────────────────────────────────

/// The named nodes of a workflow state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    LoadData,
    Analyze,
    Aggregate,
    Rank,
    Verify,
    Retry,
    DualRecommendation,
    GenerateInsights,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::LoadData => "load_data",
            Stage::Analyze => "analyze",
            Stage::Aggregate => "aggregate",
            Stage::Rank => "rank",
            Stage::Verify => "verify",
            Stage::Retry => "retry",
            Stage::DualRecommendation => "dual_recommendation",
            Stage::GenerateInsights => "generate_insights",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Metadata records ──────────────────────────────────────────────────────────

/// Classification of an entry in the run's error list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Agent { kind: AgentErrorKind },
    MissingAgent,
    StageTimeout,
    TransitionLimit,
}

/// One entry in the run's error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: Stage,
    pub kind: FailureKind,
    pub agent_id: Option<AgentId>,
    /// Fan-out item the failure belongs to, if any.
    pub item: Option<String>,
    pub message: String,
    pub retryable: bool,
}

impl ErrorRecord {
    pub fn validation(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind: FailureKind::Validation,
            agent_id: None,
            item: None,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn agent(stage: Stage, agent_id: &AgentId, item: Option<&str>, error: &AgentError) -> Self {
        Self {
            stage,
            kind: FailureKind::Agent { kind: error.kind },
            agent_id: Some(agent_id.clone()),
            item: item.map(str::to_string),
            message: error.message.clone(),
            retryable: error.retryable,
        }
    }

    /// Record a stage-fatal error. Agent errors keep their agent id.
    pub fn from_error(stage: Stage, error: &ConclaveError) -> Self {
        match error {
            ConclaveError::Agent { agent_id, source } => {
                Self::agent(stage, &AgentId::new(agent_id.as_str()), None, source)
            }
            other => {
                let kind = match other {
                    ConclaveError::StageTimeout { .. } => FailureKind::StageTimeout,
                    ConclaveError::TransitionLimit { .. } => FailureKind::TransitionLimit,
                    ConclaveError::NoAgentForCapability { .. }
                    | ConclaveError::AgentNotFound { .. } => FailureKind::MissingAgent,
                    _ => FailureKind::Validation,
                };
                Self {
                    stage,
                    kind,
                    agent_id: None,
                    item: None,
                    message: other.to_string(),
                    retryable: false,
                }
            }
        }
    }
}

/// Non-fatal conditions surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Hot-seat refinement hit its round limit without a stable ranking.
    ConvergenceWarning,
    /// Verification kept failing after the retry budget and the ranking was accepted anyway.
    DegradedPass,
    /// An optional stage found no agent for its capability.
    MissingAgent,
    /// Research context was supplied but has no entry for an entity.
    MissingContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningRecord {
    pub stage: Stage,
    pub kind: WarningKind,
    pub message: String,
}

/// Where a run currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    Done,
    Failed { stage: Stage, cause: String },
}

/// Run metadata owned by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    pub errors: Vec<ErrorRecord>,
    pub warnings: Vec<WarningRecord>,
    pub trace: Vec<StageRecord>,
    pub counters: BTreeMap<String, u32>,
    pub path: Vec<Stage>,
    /// Latest agent failure per stage, cleared when that stage next succeeds.
    pub stage_failures: BTreeMap<Stage, AgentError>,
    pub status: RunStatus,
}

// ── Working fields ────────────────────────────────────────────────────────────

/// The JSON shape of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueShape {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueShape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueShape::Null,
            Value::Bool(_) => ValueShape::Bool,
            Value::Number(_) => ValueShape::Number,
            Value::String(_) => ValueShape::String,
            Value::Array(_) => ValueShape::Array,
            Value::Object(_) => ValueShape::Object,
        }
    }
}

/// A stage-produced field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingField {
    pub value: Value,
    /// The stage that last wrote this field.
    pub owner: Stage,
    /// Fixed by the first non-null write.
    pub shape: Option<ValueShape>,
}

/// One externally supplied context entry.
///
/// Name normalization to canonical entity ids is the loader's job; the core
/// uses `entity_name` as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub entity_name: String,
    pub context: String,
}

// ── WorkflowState ─────────────────────────────────────────────────────────────

/// The single mutable record threaded through all stages of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    run_id: RunId,
    inputs: BTreeMap<String, Value>,
    working: BTreeMap<String, WorkingField>,
    extensions: BTreeMap<String, Value>,
    meta: RunMetadata,
}

impl WorkflowState {
    /// Start a state targeting the given entities.
    pub fn new<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entities: Vec<Value> = entities.into_iter().map(|e| Value::String(e.into())).collect();
        let mut inputs = BTreeMap::new();
        inputs.insert(ENTITIES.to_string(), Value::Array(entities));
        Self::with_inputs(inputs, BTreeMap::new())
    }

    /// Build a state from an untyped mapping. Known input keys become inputs;
    /// everything else lands in the extensions bucket.
    pub fn from_inputs(fields: BTreeMap<String, Value>) -> Self {
        let (inputs, extensions): (BTreeMap<_, _>, BTreeMap<_, _>) = fields
            .into_iter()
            .partition(|(k, _)| INPUT_FIELDS.contains(&k.as_str()));
        Self::with_inputs(inputs, extensions)
    }

    fn with_inputs(inputs: BTreeMap<String, Value>, extensions: BTreeMap<String, Value>) -> Self {
        Self {
            run_id: RunId::new(),
            inputs,
            working: BTreeMap::new(),
            extensions,
            meta: RunMetadata::default(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.inputs.insert(QUERY.to_string(), Value::String(query.into()));
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        let options = self
            .inputs
            .entry(OPTIONS.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = options {
            map.insert(key.into(), value);
        }
        self
    }

    /// Merge context records under `research_context`. Later records for the
    /// same entity replace earlier ones; blank contexts are ignored.
    pub fn with_context(mut self, records: impl IntoIterator<Item = ContextRecord>) -> Self {
        let context = self
            .inputs
            .entry(RESEARCH_CONTEXT.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = context {
            for record in records {
                let text = record.context.trim();
                if !text.is_empty() {
                    map.insert(record.entity_name, Value::String(text.to_string()));
                }
            }
        }
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    // ── Read access ───────────────────────────────────────────────────────────

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// The target entities. Non-string entries are skipped here; the Validate
    /// stage rejects them.
    pub fn entities(&self) -> Vec<String> {
        self.inputs
            .get(ENTITIES)
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    pub fn query(&self) -> Option<&str> {
        self.inputs.get(QUERY).and_then(Value::as_str)
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.inputs.get(OPTIONS).and_then(|o| o.get(key))
    }

    /// Context for one entity. A missing entry means "no context".
    pub fn research_context(&self, entity: &str) -> Option<&str> {
        self.inputs
            .get(RESEARCH_CONTEXT)
            .and_then(|c| c.get(entity))
            .and_then(Value::as_str)
    }

    /// True when the caller supplied any research context at all.
    pub fn has_research_context(&self) -> bool {
        self.inputs
            .get(RESEARCH_CONTEXT)
            .and_then(Value::as_object)
            .is_some_and(|m| !m.is_empty())
    }

    /// All caller inputs as one JSON object, for schema validation.
    pub fn input_document(&self) -> Value {
        Value::Object(self.inputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Look a field up across working fields, inputs, then extensions.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.working
            .get(name)
            .map(|f| &f.value)
            .or_else(|| self.inputs.get(name))
            .or_else(|| self.extensions.get(name))
    }

    /// True when the field exists and is not JSON null.
    pub fn has(&self, name: &str) -> bool {
        self.field(name).is_some_and(|v| !v.is_null())
    }

    pub fn owner(&self, name: &str) -> Option<Stage> {
        self.working.get(name).map(|f| f.owner)
    }

    pub fn working_fields(&self) -> impl Iterator<Item = (&String, &WorkingField)> {
        self.working.iter()
    }

    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.meta
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.meta.errors
    }

    pub fn warnings(&self) -> &[WarningRecord] {
        &self.meta.warnings
    }

    pub fn trace(&self) -> &[StageRecord] {
        &self.meta.trace
    }

    pub fn counter(&self, name: &str) -> u32 {
        self.meta.counters.get(name).copied().unwrap_or(0)
    }

    pub fn path(&self) -> &[Stage] {
        &self.meta.path
    }

    pub fn status(&self) -> &RunStatus {
        &self.meta.status
    }

    pub fn stage_failure(&self, stage: Stage) -> Option<&AgentError> {
        self.meta.stage_failures.get(&stage)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.meta.status, RunStatus::Failed { .. })
    }

    // ── Engine-side mutation ──────────────────────────────────────────────────

    /// Merge a stage's partial update.
    ///
    /// The whole update is checked before any field is written, so a rejected
    /// merge leaves the state untouched.
    pub fn merge(&mut self, stage: Stage, update: PartialUpdate) -> ConclaveResult<()> {
        for (key, value) in &update {
            if self.inputs.contains_key(key) || INPUT_FIELDS.contains(&key.as_str()) {
                return Err(ConclaveError::StructuralViolation {
                    reason: format!("stage {stage} attempted to overwrite input field '{key}'"),
                });
            }
            if let Some(existing) = self.working.get(key) {
                let incoming = ValueShape::of(value);
                match existing.shape {
                    Some(shape) if incoming != ValueShape::Null && incoming != shape => {
                        return Err(ConclaveError::StructuralViolation {
                            reason: format!(
                                "stage {stage} changed field '{key}' from {shape:?} to {incoming:?} \
                                 (first written by {})",
                                existing.owner
                            ),
                        });
                    }
                    _ => {}
                }
            }
        }

        for (key, value) in update {
            let incoming = match ValueShape::of(&value) {
                ValueShape::Null => None,
                shape => Some(shape),
            };
            let shape = self.working.get(&key).and_then(|f| f.shape).or(incoming);
            self.working.insert(key, WorkingField { value, owner: stage, shape });
        }
        Ok(())
    }

    pub fn record_error(&mut self, record: ErrorRecord) {
        self.meta.errors.push(record);
    }

    pub fn record_warning(&mut self, record: WarningRecord) {
        self.meta.warnings.push(record);
    }

    pub fn record_trace(&mut self, record: StageRecord) {
        self.meta.trace.push(record);
    }

    /// Increment a named counter and return its new value.
    pub fn bump_counter(&mut self, name: &str) -> u32 {
        let counter = self.meta.counters.entry(name.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn enter(&mut self, stage: Stage) {
        self.meta.path.push(stage);
    }

    pub fn set_stage_failure(&mut self, stage: Stage, failure: Option<AgentError>) {
        match failure {
            Some(error) => {
                self.meta.stage_failures.insert(stage, error);
            }
            None => {
                self.meta.stage_failures.remove(&stage);
            }
        }
    }

    /// Mark the run failed. The first recorded cause wins.
    pub fn fail(&mut self, stage: Stage, cause: impl Into<String>) {
        if !self.is_failed() {
            self.meta.status = RunStatus::Failed { stage, cause: cause.into() };
        }
    }

    pub fn complete(&mut self) {
        if self.meta.status == RunStatus::Running {
            self.meta.status = RunStatus::Done;
        }
    }
}
