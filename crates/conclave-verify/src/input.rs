//! Input validation for the Validate stage.
//!
//! `InputValidator` checks the caller's input document in three phases:
//!
//! 1. **Entities**: the entity list is present, every entry is a non-empty
//!    string, there are no duplicates, and the count is within bounds.
//! 2. **Structural**: the input document is validated against the optional
//!    `InputSchema::json_schema` with the `jsonschema` crate.
//! 3. **Semantic**: each `InputRule` is evaluated in order.
//!
//! All failures are collected before returning so the caller sees the full
//! set in one pass.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use tracing::{debug, warn};

use conclave_contracts::{
    state::{WorkflowState, ENTITIES},
    verify::{InputRuleType, InputSchema, VerificationFailure, VerificationReport},
};

/// A caller-supplied input check.
///
/// Receives the full input document. Returns `Some(message)` on failure.
pub type CustomInputFn = Box<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Validates run inputs before any agent is invoked.
pub struct InputValidator {
    min_entities: usize,
    max_entities: usize,
    schema: Option<InputSchema>,
    custom_rules: HashMap<String, CustomInputFn>,
}

impl InputValidator {
    pub fn new(min_entities: usize, max_entities: usize) -> Self {
        Self {
            min_entities,
            max_entities,
            schema: None,
            custom_rules: HashMap::new(),
        }
    }

    pub fn with_schema(mut self, schema: InputSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Register a custom check under `name`. Registering the same name twice
    /// replaces the previous function.
    pub fn register_rule(&mut self, name: impl Into<String>, f: CustomInputFn) {
        self.custom_rules.insert(name.into(), f);
    }

    pub fn validate(&self, state: &WorkflowState) -> VerificationReport {
        let document = state.input_document();
        let mut failures = self.check_entities(&document);

        if let Some(schema) = &self.schema {
            self.check_schema(schema, &document, &mut failures);
            self.check_rules(schema, &document, &mut failures);
        }

        let report = VerificationReport::from_failures(failures);
        debug!(
            passed = report.passed,
            failure_count = report.failures.len(),
            "input validation complete"
        );
        report
    }

    // ── Phase 1: Entities ─────────────────────────────────────────────────────

    fn check_entities(&self, document: &Value) -> Vec<VerificationFailure> {
        let mut failures = Vec::new();

        let Some(entities) = document.get(ENTITIES).and_then(Value::as_array) else {
            failures.push(VerificationFailure::new(
                "entities-present",
                "input field 'entities' is missing or not a list",
            ));
            return failures;
        };

        let mut seen = BTreeSet::new();
        for (i, entity) in entities.iter().enumerate() {
            match entity.as_str() {
                Some(s) if !s.trim().is_empty() => {
                    if !seen.insert(s) {
                        failures.push(VerificationFailure::new(
                            "entities-unique",
                            format!("entity '{s}' is listed more than once"),
                        ));
                    }
                }
                _ => failures.push(VerificationFailure::new(
                    "entities-well-formed",
                    format!("entity at position {i} is not a non-empty string: {entity}"),
                )),
            }
        }

        if entities.is_empty() {
            failures.push(VerificationFailure::new(
                "entities-count",
                "entity list is empty",
            ));
        } else if entities.len() < self.min_entities || entities.len() > self.max_entities {
            failures.push(VerificationFailure::new(
                "entities-count",
                format!(
                    "{} entities supplied; expected between {} and {}",
                    entities.len(),
                    self.min_entities,
                    self.max_entities
                ),
            ));
        }

        failures
    }

    // ── Phase 2: JSON Schema ──────────────────────────────────────────────────

    fn check_schema(&self, schema: &InputSchema, document: &Value, failures: &mut Vec<VerificationFailure>) {
        // A null json_schema means "no structural constraint".
        if schema.json_schema.is_null() {
            return;
        }
        match jsonschema::validator_for(&schema.json_schema) {
            Ok(validator) => {
                for error in validator.iter_errors(document) {
                    let message = format!("JSON Schema violation at {}: {}", error.instance_path, error);
                    warn!(schema_id = %schema.schema_id, %message, "structural validation failure");
                    failures.push(VerificationFailure::new("json-schema", message));
                }
            }
            Err(e) => {
                let message = format!("invalid JSON Schema document: {e}");
                warn!(schema_id = %schema.schema_id, %message, "schema compilation failure");
                failures.push(VerificationFailure::new("json-schema", message));
            }
        }
    }

    // ── Phase 3: Rules ────────────────────────────────────────────────────────

    fn check_rules(&self, schema: &InputSchema, document: &Value, failures: &mut Vec<VerificationFailure>) {
        for rule in &schema.rules {
            let failure = match &rule.rule_type {
                InputRuleType::RequiredField { field_path } => resolve_path(document, field_path)
                    .is_none()
                    .then(|| format!("required field '{field_path}' is missing or null")),

                InputRuleType::AllowedValues { field_path, allowed } => {
                    match resolve_path(document, field_path) {
                        Some(actual) if !allowed.contains(actual) => Some(format!(
                            "field '{field_path}' has value {actual} which is not in the allowed set"
                        )),
                        _ => None,
                    }
                }

                // An unregistered name is itself a failure so misconfigured
                // rules surface immediately.
                InputRuleType::Custom { function_name } => {
                    match self.custom_rules.get(function_name.as_str()) {
                        Some(f) => f(document),
                        None => Some(format!(
                            "no custom rule registered for function name '{function_name}'"
                        )),
                    }
                }
            };

            if let Some(message) = failure {
                warn!(rule_id = %rule.rule_id, %message, "input rule failed");
                failures.push(VerificationFailure::new(rule.rule_id.clone(), message));
            }
        }
    }
}

/// Resolve a dotted path (e.g. `"options.horizon"`). Returns `None` when a
/// segment is missing or the value is null.
pub(crate) fn resolve_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(v) if !v.is_null() => current = v,
            _ => return None,
        }
    }
    Some(current)
}
