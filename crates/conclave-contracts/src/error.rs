//! Error types for the Conclave orchestration core.
//!
//! Registry, definition, and engine operations return `ConclaveResult<T>`.
//! Individual agent invocations return `AgentError`, which never escapes the
//! engine as a panic: it is either recorded in the run's error list or, when
//! the stage policy says so, wrapped in `ConclaveError::Agent`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    agent::ExecutionModel,
    capability::Capability,
    state::Stage,
};

/// What went wrong inside a single agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    /// The agent body reported a failure.
    Execution,
    /// The invocation exceeded the descriptor's timeout.
    Timeout,
    /// The output was not an object or wrote undeclared fields.
    MalformedOutput,
    /// A declared required input was absent from the state view.
    MissingInput,
    /// The agent body panicked.
    Panicked,
    /// A downstream service was unreachable.
    Network,
}

impl fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentErrorKind::Execution => "execution",
            AgentErrorKind::Timeout => "timeout",
            AgentErrorKind::MalformedOutput => "malformed output",
            AgentErrorKind::MissingInput => "missing input",
            AgentErrorKind::Panicked => "panicked",
            AgentErrorKind::Network => "network",
        };
        f.write_str(s)
    }
}

/// The failure value every adapted agent returns instead of throwing.
///
/// `retryable` marks failures that may succeed on a later attempt (timeouts,
/// network errors). Only retryable failures are eligible for the Retry stage.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl AgentError {
    pub fn new(kind: AgentErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    /// A non-retryable failure reported by the agent body.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Execution, message, false)
    }

    /// A failure reported by the agent body that may succeed when retried.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Execution, message, true)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Network, message, true)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Timeout, message, true)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::MalformedOutput, message, false)
    }

    pub fn missing_input(fields: &[String]) -> Self {
        Self::new(
            AgentErrorKind::MissingInput,
            format!("required inputs absent from state: {}", fields.join(", ")),
            false,
        )
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Panicked, message, false)
    }
}

/// The unified error type for the Conclave orchestration core.
#[derive(Debug, Error)]
pub enum ConclaveError {
    /// Required run input is missing or malformed. Fatal to the run.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    /// An agent with this id is already registered and the registry rejects duplicates.
    #[error("agent '{agent_id}' is already registered")]
    DuplicateAgent { agent_id: String },

    #[error("agent '{agent_id}' is not registered")]
    AgentNotFound { agent_id: String },

    /// No enabled agent declares the capability a stage needs.
    #[error("no enabled agent provides capability '{capability}'")]
    NoAgentForCapability { capability: Capability },

    /// The raw unit's execution model differs from the descriptor's.
    #[error("agent '{agent_id}' declares execution model {expected} but was given a {actual} unit")]
    AdapterMismatch {
        agent_id: String,
        expected: ExecutionModel,
        actual: ExecutionModel,
    },

    /// An agent failure that the stage policy treats as fatal.
    #[error("agent '{agent_id}' failed: {source}")]
    Agent {
        agent_id: String,
        #[source]
        source: AgentError,
    },

    #[error("stage {stage} exceeded its timeout of {timeout_secs}s")]
    StageTimeout { stage: Stage, timeout_secs: u64 },

    /// The run took more transitions than the engine allows.
    #[error("workflow exceeded the transition limit of {limit}")]
    TransitionLimit { limit: u32 },

    /// A state invariant was broken. Always aborts the run.
    #[error("structural invariant violated: {reason}")]
    StructuralViolation { reason: String },

    /// The workflow definition was rejected before any agent ran.
    #[error("invalid workflow definition: {reason}")]
    InvalidWorkflow { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

/// Convenience alias used throughout the Conclave crates.
pub type ConclaveResult<T> = Result<T, ConclaveError>;
