//! Runnable energy scenarios.
//!
//! Each scenario wires the real Conclave components (registry, engine,
//! trace sink) to the mock energy agents and prints a short report.

pub mod competitive;
pub mod standard_pipeline;

use std::{path::PathBuf, sync::Arc};

use serde_json::{json, Value};
use tracing::info;

use conclave_contracts::{
    error::ConclaveResult,
    ranking::parse_ranking,
    state::{RunStatus, WorkflowState, ENTITIES},
    verify::{InputRule, InputRuleType, InputSchema},
};
use conclave_engine::fields;
use conclave_policy::WorkflowPolicy;
use conclave_trace::InMemoryTraceSink;
use conclave_verify::InputValidator;

use crate::{
    mock_data::known_countries,
    research_loader::{filter_to, load_context_file, normalize_entity_name},
};

// ── Policy TOML ───────────────────────────────────────────────────────────────

/// Embedded policy for the energy deployment.
const ENERGY_POLICY: &str = include_str!("../../policies/energy.toml");

/// Countries ranked when the caller names none.
pub const DEFAULT_COUNTRIES: [&str; 4] = ["USA", "IND", "CHN", "BRA"];

pub fn energy_policy() -> ConclaveResult<WorkflowPolicy> {
    WorkflowPolicy::from_toml_str(ENERGY_POLICY)
}

// ── Input validation ──────────────────────────────────────────────────────────

/// Entities must be uppercase ISO3 codes with mock data behind them.
pub fn input_validator(policy: &WorkflowPolicy) -> InputValidator {
    let schema = InputSchema {
        schema_id: "energy-inputs-v1".to_string(),
        json_schema: json!({
            "type": "object",
            "required": ["entities"],
            "properties": {
                "entities": {
                    "type": "array",
                    "items": { "type": "string", "pattern": "^[A-Z]{3}$" }
                }
            }
        }),
        rules: vec![InputRule {
            rule_id: "known-countries".to_string(),
            description: "Every entity must have resource data".to_string(),
            rule_type: InputRuleType::Custom {
                function_name: "known-countries".to_string(),
            },
        }],
    };

    let mut validator =
        InputValidator::new(policy.validation.min_entities, policy.validation.max_entities).with_schema(schema);
    validator.register_rule(
        "known-countries",
        Box::new(|document: &Value| {
            let known = known_countries();
            let unknown: Vec<&str> = document[ENTITIES]
                .as_array()
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .filter(|e| !known.contains(e))
                        .collect()
                })
                .unwrap_or_default();
            (!unknown.is_empty()).then(|| format!("no resource data for: {}", unknown.join(", ")))
        }),
    );
    validator
}

// ── Options ───────────────────────────────────────────────────────────────────

/// What the caller chose on the command line.
#[derive(Debug, Clone, Default)]
pub struct ScenarioOptions {
    /// Policy TOML replacing the embedded one.
    pub policy: Option<PathBuf>,
    /// JSON research context file.
    pub research: Option<PathBuf>,
    /// Country names or codes; `DEFAULT_COUNTRIES` when empty.
    pub countries: Vec<String>,
}

impl ScenarioOptions {
    /// Requested countries as ISO3 codes. Unrecognized names are kept
    /// uppercased so validation reports them.
    pub fn countries(&self) -> Vec<String> {
        if self.countries.is_empty() {
            return DEFAULT_COUNTRIES.iter().map(|c| c.to_string()).collect();
        }
        self.countries
            .iter()
            .map(|c| normalize_entity_name(c).unwrap_or_else(|| c.trim().to_uppercase()))
            .collect()
    }

    pub fn policy(&self) -> ConclaveResult<WorkflowPolicy> {
        match &self.policy {
            Some(path) => WorkflowPolicy::from_file(path),
            None => energy_policy(),
        }
    }

    /// The initial state, with research context for the requested countries
    /// when a research file was given.
    pub fn initial_state(&self) -> ConclaveResult<WorkflowState> {
        let countries = self.countries();
        let mut state = WorkflowState::new(countries.clone())
            .with_query("Which countries offer the best renewable-energy investment case?");
        if let Some(path) = &self.research {
            let records = filter_to(load_context_file(path)?, &countries);
            info!(path = %path.display(), records = records.len(), "research context loaded");
            state = state.with_context(records);
        }
        Ok(state)
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

fn print_ranking(state: &WorkflowState) {
    let entries = state.field(fields::RANKING).and_then(parse_ranking).unwrap_or_default();
    if entries.is_empty() {
        println!("  Ranking:                (none)");
        return;
    }
    println!("  Ranking:");
    for e in &entries {
        let note = if e.eliminated { "  [eliminated]" } else { "" };
        println!("    {:>2}. {}  {:>6.2}{}", e.rank, e.entity, e.score, note);
    }
}

/// Print the outcome of a finished run and its trace chain status.
pub(crate) fn print_report(state: &WorkflowState, sink: &Arc<InMemoryTraceSink>) -> ConclaveResult<()> {
    let path: Vec<&str> = state.path().iter().map(|s| s.as_str()).collect();
    println!("  Path:                   {}", path.join(" -> "));
    match state.status() {
        RunStatus::Done => println!("  Status:                 Done"),
        RunStatus::Failed { stage, cause } => println!("  Status:                 Failed at {stage}: {cause}"),
        RunStatus::Running => println!("  Status:                 Running"),
    }
    print_ranking(state);

    if let Some(dual) = state.field(fields::DUAL_RECOMMENDATION) {
        println!(
            "  Dual recommendation:    {} / {} (gap {})",
            dual["option_a"]["entity"].as_str().unwrap_or("?"),
            dual["option_b"]["entity"].as_str().unwrap_or("?"),
            dual["score_gap"]
        );
    }
    if let Some(insights) = state.field(fields::INSIGHTS).and_then(Value::as_str) {
        println!("  Insights:               {insights}");
    }
    for w in state.warnings() {
        println!("  Warning [{:?}]: {}", w.kind, w.message);
    }
    for e in state.errors() {
        println!("  Error at {}: {}", e.stage, e.message);
    }

    let run_id = state.run_id().to_string();
    let intact = sink.verify_integrity(&run_id)?;
    let entries = sink.export_log(&run_id)?.map_or(0, |log| log.entries.len());
    println!(
        "  Trace chain integrity:  {} ({} record(s) in chain)",
        if intact { "VERIFIED" } else { "FAILED" },
        entries
    );
    println!();
    Ok(())
}
