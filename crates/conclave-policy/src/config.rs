//! Workflow policy configuration.
//!
//! A `WorkflowPolicy` is deserialized from TOML. Every field has a default,
//! so an empty document is a valid policy. Enum values are kebab-case
//! strings for readability:
//!
//! ```toml
//! [engine]
//! max_concurrency = 4
//! stage_timeout_secs = 600
//! partial_failure = "record-and-skip"
//!
//! [verify]
//! max_retries = 3
//! ambiguity_threshold = 0.5
//!
//! [ranking]
//! aggregation = "mean"
//! tie_break = "entity-id-ascending"
//! separation_threshold = 1.0
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use conclave_contracts::error::{ConclaveError, ConclaveResult};
use conclave_core::RegistrationPolicy;

/// What a fan-out stage does when one item's agent fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartialFailurePolicy {
    /// Record the failure, write null for that item, and keep going.
    #[default]
    RecordAndSkip,
    /// Abort the stage on the first failure and fail the run.
    AbortStage,
}

/// How per-peer scores reduce to one composite score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationRule {
    #[default]
    Mean,
    Median,
    /// Peer-wise rank points.
    Borda,
}

/// Secondary sort key for equal composite scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    #[default]
    EntityIdAscending,
    EntityIdDescending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Upper bound on concurrent invocations within one fan-out.
    pub max_concurrency: usize,
    pub stage_timeout_secs: u64,
    /// Hard cap on stage transitions per run.
    pub max_transitions: u32,
    pub partial_failure: PartialFailurePolicy,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            stage_timeout_secs: 600,
            max_transitions: 64,
            partial_failure: PartialFailurePolicy::RecordAndSkip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSection {
    pub min_entities: usize,
    pub max_entities: usize,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            min_entities: 1,
            max_entities: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifySection {
    pub max_retries: u32,
    /// Top-two score gap at or below which the ranking is ambiguous.
    pub ambiguity_threshold: f64,
}

impl Default for VerifySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            ambiguity_threshold: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingSection {
    pub aggregation: AggregationRule,
    pub tie_break: TieBreak,
    /// Phase 1 is final when every adjacent composite gap exceeds this.
    pub separation_threshold: f64,
    /// Configured hot-seat size; capped at half the active set.
    pub hot_seat_size: usize,
    pub max_rounds: u32,
    /// A defense counts as improved when the composite rises by more than this.
    pub improvement_margin: f64,
    pub strike_limit: u8,
}

impl Default for RankingSection {
    fn default() -> Self {
        Self {
            aggregation: AggregationRule::Mean,
            tie_break: TieBreak::EntityIdAscending,
            separation_threshold: 1.0,
            hot_seat_size: 2,
            max_rounds: 3,
            improvement_margin: 0.0,
            strike_limit: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub on_duplicate: RegistrationPolicy,
}

/// The complete, validated policy for one workflow definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowPolicy {
    pub engine: EngineSection,
    pub validation: ValidationSection,
    pub verify: VerifySection,
    pub ranking: RankingSection,
    pub registry: RegistrySection,
}

impl WorkflowPolicy {
    /// Parse `s` as TOML and validate the result.
    ///
    /// Returns `ConclaveError::Config` if the TOML is malformed, does not
    /// match the schema, or holds out-of-range values.
    pub fn from_toml_str(s: &str) -> ConclaveResult<Self> {
        let policy: WorkflowPolicy = toml::from_str(s).map_err(|e| ConclaveError::Config {
            reason: format!("failed to parse workflow policy TOML: {}", e),
        })?;
        policy.validate()?;
        debug!(
            max_concurrency = policy.engine.max_concurrency,
            max_retries = policy.verify.max_retries,
            max_rounds = policy.ranking.max_rounds,
            "workflow policy loaded"
        );
        Ok(policy)
    }

    /// Read the file at `path` and parse it as a workflow policy.
    pub fn from_file(path: &Path) -> ConclaveResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConclaveError::Config {
            reason: format!("failed to read policy file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject values that would make a run meaningless.
    pub fn validate(&self) -> ConclaveResult<()> {
        let problem = if self.engine.max_concurrency == 0 {
            Some("engine.max_concurrency must be at least 1".to_string())
        } else if self.engine.stage_timeout_secs == 0 {
            Some("engine.stage_timeout_secs must be at least 1".to_string())
        } else if self.validation.min_entities > self.validation.max_entities {
            Some(format!(
                "validation.min_entities ({}) exceeds validation.max_entities ({})",
                self.validation.min_entities, self.validation.max_entities
            ))
        } else if self.ranking.hot_seat_size == 0 {
            Some("ranking.hot_seat_size must be at least 1".to_string())
        } else if self.ranking.strike_limit == 0 {
            Some("ranking.strike_limit must be at least 1".to_string())
        } else if !self.verify.ambiguity_threshold.is_finite()
            || !self.ranking.separation_threshold.is_finite()
            || !self.ranking.improvement_margin.is_finite()
        {
            Some("thresholds must be finite numbers".to_string())
        } else {
            None
        };

        match problem {
            Some(reason) => Err(ConclaveError::Config { reason }),
            None => Ok(()),
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.stage_timeout_secs)
    }
}
