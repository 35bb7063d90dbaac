//! Scenario 1: Standard Investment Pipeline
//!
//! Ranks countries on project-finance fundamentals:
//!
//!   Validate → LoadData → Analyze → Aggregate → Rank → Verify
//!     → (DualRecommendation) → GenerateInsights → Done
//!
//! LoadData fans out over countries (two candidate sites each), Analyze fans
//! out over the loaded sites, Aggregate averages site metrics into
//! `country_metrics`, and the country ranker orders countries by investment
//! score. A close top two routes through DualRecommendation.

use std::sync::Arc;

use tracing::info;

use conclave_contracts::{capability::Capability, error::ConclaveResult, state::{Stage, WorkflowState}};
use conclave_engine::{fields, Edge, FanOut, OnMissing, Selection, StageAction, StageDef, WorkflowDefinition, WorkflowEngine};
use conclave_policy::WorkflowPolicy;
use conclave_trace::InMemoryTraceSink;

use crate::{
    agents::{build_registry, standard_agents},
    COUNTRY_METRICS,
};

use super::{input_validator, print_report, ScenarioOptions};

/// The standard pipeline, aggregating into `country_metrics` and validating
/// inputs against the energy input schema.
pub fn definition(policy: WorkflowPolicy) -> WorkflowDefinition {
    let validator = input_validator(&policy);
    WorkflowDefinition::standard(policy)
        .with_stage(
            StageDef::new(
                Stage::Aggregate,
                StageAction::Aggregate {
                    source: fields::METRICS.to_string(),
                    into: COUNTRY_METRICS.to_string(),
                    group_by: "entity".to_string(),
                },
                Edge::Always(Stage::Rank),
            )
            .requires(fields::METRICS),
        )
        .with_stage(
            StageDef::new(
                Stage::Rank,
                StageAction::Invoke {
                    capability: Capability::Ranking,
                    selection: Selection::First,
                    fan_out: FanOut::None,
                    on_missing: OnMissing::Fail,
                },
                Edge::Always(Stage::Verify),
            )
            .requires(COUNTRY_METRICS),
        )
        .with_validator(validator)
}

/// Run the pipeline without printing.
pub async fn execute(options: &ScenarioOptions) -> ConclaveResult<(WorkflowState, Arc<InMemoryTraceSink>)> {
    let policy = options.policy()?;
    let registry = build_registry(standard_agents(), policy.registry.on_duplicate)?;
    let sink = Arc::new(InMemoryTraceSink::new());
    let engine = WorkflowEngine::new(Arc::new(registry)).with_trace_sink(sink.clone());

    let state = engine.run(options.initial_state()?, &definition(policy)).await?;
    info!(run_id = %state.run_id(), status = ?state.status(), "standard pipeline finished");
    Ok((state, sink))
}

pub async fn run_scenario(options: &ScenarioOptions) -> ConclaveResult<()> {
    println!("=== Scenario 1: Standard Investment Pipeline ===");
    println!();
    println!("  Countries:              {}", options.countries().join(", "));
    println!("  Pipeline:               sites -> site finance -> country averages -> rank -> verify");
    println!();

    let (state, sink) = execute(options).await?;
    print_report(&state, &sink)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use conclave_contracts::{ranking::parse_ranking, state::RunStatus};

    use super::*;
    use crate::mock_data::{candidate_sites, investment_score, site_metrics};

    fn options(countries: &[&str]) -> ScenarioOptions {
        ScenarioOptions {
            countries: countries.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Investment score of a country, averaging its site metrics the way the
    /// Aggregate stage does.
    fn expected_score(code: &str) -> f64 {
        let sites = candidate_sites(code).unwrap();
        let metrics: Vec<Value> = sites.as_array().unwrap().iter().map(|s| site_metrics(s).unwrap()).collect();
        let mean = |key: &str| metrics.iter().map(|m| m[key].as_f64().unwrap()).sum::<f64>() / metrics.len() as f64;
        investment_score(&serde_json::json!({ "irr": mean("irr"), "lcoe": mean("lcoe") })).unwrap()
    }

    // ── Happy path ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_default_countries_reach_done() {
        let (state, sink) = execute(&ScenarioOptions::default()).await.unwrap();
        assert_eq!(state.status(), &RunStatus::Done);
        assert!(state.errors().is_empty(), "{:?}", state.errors());
        assert!(state.has(fields::INSIGHTS));

        let metrics = state.field(COUNTRY_METRICS).unwrap().as_object().unwrap();
        assert_eq!(metrics.len(), 4);
        assert_eq!(metrics["USA"]["sample_count"], 2);

        assert!(sink.verify_integrity(&state.run_id().to_string()).unwrap());
    }

    #[tokio::test]
    async fn test_ranking_follows_investment_score() {
        let countries = ["DEU", "ESP", "MEX", "AUS", "ZAF"];
        let (state, _) = execute(&options(&countries)).await.unwrap();
        assert_eq!(state.status(), &RunStatus::Done);

        let mut expected: Vec<(String, f64)> =
            countries.iter().map(|c| (c.to_string(), expected_score(c))).collect();
        expected.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let ranking = parse_ranking(state.field(fields::RANKING).unwrap()).unwrap();
        let got: Vec<&str> = ranking.iter().map(|e| e.entity.as_str()).collect();
        let want: Vec<&str> = expected.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(got, want);
        assert_eq!(ranking.iter().map(|e| e.rank).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_close_top_two_takes_dual_path() {
        let (state, _) = execute(&options(&["USA", "IND", "CHN", "BRA", "ESP"])).await.unwrap();
        let ranking = parse_ranking(state.field(fields::RANKING).unwrap()).unwrap();
        let gap = (ranking[0].score - ranking[1].score).abs();

        let dual = state.path().contains(&Stage::DualRecommendation);
        assert_eq!(dual, gap <= 0.25, "gap {gap}");
        assert_eq!(dual, state.has(fields::DUAL_RECOMMENDATION));
    }

    // ── Input validation ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_single_country_fails_validation() {
        let (state, _) = execute(&options(&["USA"])).await.unwrap();
        match state.status() {
            RunStatus::Failed { stage, .. } => assert_eq!(*stage, Stage::Validate),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(!state.has(fields::LOCATIONS));
    }

    #[tokio::test]
    async fn test_unknown_country_is_rejected() {
        let (state, _) = execute(&options(&["USA", "Norway"])).await.unwrap();
        match state.status() {
            RunStatus::Failed { stage, .. } => assert_eq!(*stage, Stage::Validate),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(state.errors().iter().any(|e| e.message.contains("NORWAY")));
    }
}
