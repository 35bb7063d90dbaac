//! Input schema and verification report types.
//!
//! The Validate stage checks caller inputs against an `InputSchema`; the
//! Verify stage checks a ranking. Both produce a `VerificationReport`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declarative checks applied to a run's input document.
///
/// Combines a JSON Schema document with rules JSON Schema cannot express
/// conveniently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSchema {
    /// Unique identifier for this schema (e.g. "energy-inputs-v1").
    pub schema_id: String,
    /// JSON Schema document. `null` means no structural constraint.
    pub json_schema: Value,
    pub rules: Vec<InputRule>,
}

/// A single input rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRule {
    /// Referenced in failure reports.
    pub rule_id: String,
    pub description: String,
    pub rule_type: InputRuleType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InputRuleType {
    /// The field at `field_path` must be present and non-null.
    RequiredField {
        /// Dotted path, e.g. "options.horizon".
        field_path: String,
    },

    /// The field at `field_path`, when present, must equal one of `allowed`.
    AllowedValues {
        field_path: String,
        allowed: Vec<Value>,
    },

    /// Delegate to a named function registered with the validator.
    Custom {
        function_name: String,
    },
}

/// The result of a verification pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True only if every check passed.
    pub passed: bool,
    /// All failures collected during this run. Empty on pass.
    pub failures: Vec<VerificationFailure>,
}

impl VerificationReport {
    pub fn from_failures(failures: Vec<VerificationFailure>) -> Self {
        Self {
            passed: failures.is_empty(),
            failures,
        }
    }

    /// All failures joined as `[rule] message; ...`.
    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("[{}] {}", f.rule_id, f.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationFailure {
    pub rule_id: String,
    pub message: String,
}

impl VerificationFailure {
    pub fn new(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            message: message.into(),
        }
    }
}
