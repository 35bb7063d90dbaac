//! Execution trace records.
//!
//! Every agent invocation and every stage transition produces one
//! `StageRecord`. The engine appends them to the run's metadata and, when a
//! trace sink is configured, forwards them for hash-chaining.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{agent::AgentId, state::Stage};

/// What a traced step produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// An invocation succeeded and wrote these fields.
    Updated { fields: Vec<String> },
    /// An invocation failed.
    Failed { message: String, retryable: bool },
    /// The stage finished and the engine moved to `to`.
    Transition { to: Stage },
}

/// An immutable record of one traced step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    /// Absent for stage-level records such as transitions.
    pub agent_id: Option<AgentId>,
    /// Fan-out item key, if the step was part of a fan-out.
    pub item: Option<String>,
    pub outcome: StageOutcome,
    pub elapsed_ms: u64,
    /// Wall-clock time the record was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl StageRecord {
    pub fn invocation(
        stage: Stage,
        agent_id: &AgentId,
        item: Option<&str>,
        outcome: StageOutcome,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            stage,
            agent_id: Some(agent_id.clone()),
            item: item.map(str::to_string),
            outcome,
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn transition(stage: Stage, to: Stage, elapsed_ms: u64) -> Self {
        Self {
            stage,
            agent_id: None,
            item: None,
            outcome: StageOutcome::Transition { to },
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }
}
