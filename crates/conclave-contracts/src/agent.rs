//! Agent identity and descriptor types.
//!
//! An `AgentDescriptor` is created once at registration time and never
//! mutated afterwards. The registry owns it; adapted agents hold a shared
//! reference. Conclave does not prescribe agent internals, only the contract
//! they are invoked through.

use std::{collections::BTreeSet, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::capability::{Capability, CapabilitySet};

/// Default per-invocation timeout for an agent.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Stable, unique identifier for a registered agent.
///
/// Example: AgentId("data-team-location-loader-v1")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub uuid::Uuid);

impl RunId {
    /// Create a new, unique run ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which adapter turns a raw unit of work into an invocable agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModel {
    /// An async function over a state view.
    PlainFunction,
    /// A tool-augmented chain (LLM plus tools) with a single input and output key.
    ToolAugmented,
    /// A nested workflow with explicit field mappings in both directions.
    SubWorkflow,
}

impl fmt::Display for ExecutionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionModel::PlainFunction => "plain_function",
            ExecutionModel::ToolAugmented => "tool_augmented",
            ExecutionModel::SubWorkflow => "sub_workflow",
        };
        f.write_str(s)
    }
}

/// Everything the core knows about an agent.
///
/// `required_inputs` are state field names that must be present (non-null)
/// before the agent is invoked. `output_keys` is the exhaustive set of fields
/// the agent may write; anything else in its output is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Owning team, used for filtered discovery.
    #[serde(default)]
    pub business_unit: Option<String>,
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub required_inputs: BTreeSet<String>,
    #[serde(default)]
    pub output_keys: BTreeSet<String>,
    /// Upper bound on a single invocation.
    pub timeout: Duration,
    pub execution_model: ExecutionModel,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Disabled agents stay registered but are never resolved.
    pub enabled: bool,
}

impl AgentDescriptor {
    /// Start a descriptor with version `1.0.0`, the default timeout and no
    /// capabilities, inputs, or outputs.
    pub fn new(id: impl Into<String>, name: impl Into<String>, execution_model: ExecutionModel) -> Self {
        Self {
            id: AgentId::new(id),
            name: name.into(),
            version: "1.0.0".to_string(),
            description: String::new(),
            business_unit: None,
            capabilities: CapabilitySet::default(),
            required_inputs: BTreeSet::new(),
            output_keys: BTreeSet::new(),
            timeout: DEFAULT_AGENT_TIMEOUT,
            execution_model,
            tags: Vec::new(),
            enabled: true,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn business_unit(mut self, unit: impl Into<String>) -> Self {
        self.business_unit = Some(unit.into());
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.grant(capability);
        self
    }

    /// Declare a state field that must be present before invocation.
    pub fn requires(mut self, field: impl Into<String>) -> Self {
        self.required_inputs.insert(field.into());
        self
    }

    /// Declare a state field this agent writes.
    pub fn produces(mut self, field: impl Into<String>) -> Self {
        self.output_keys.insert(field.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.has(capability)
    }
}
