//! Scenario 2: Competitive Country Ranking
//!
//! Runs the competitive ranking protocol over countries:
//!
//!   Validate → Rank (research → present → peer review → hot seat) → Verify
//!     → (DualRecommendation) → GenerateInsights → Done
//!
//! A finance, a policy and a grid reviewer score each country's expert
//! presentation. When the composite scores are too close to call, the
//! bottom of the ranking takes the hot seat: a devil's advocate challenges
//! it, a country advocate defends it, and the panel re-scores it. Three
//! unanswered challenges eliminate a country.
//!
//! Research context from `--research` is folded into the research bundles;
//! countries without context get a `MissingContext` warning.

use std::sync::Arc;

use tracing::info;

use conclave_contracts::{
    error::ConclaveResult,
    ranking::{RankingOutcome, RankingPhase},
    state::WorkflowState,
};
use conclave_engine::{WorkflowDefinition, WorkflowEngine};
use conclave_policy::WorkflowPolicy;
use conclave_ranking::{fields as ranking_fields, CompetitiveRanking};
use conclave_trace::InMemoryTraceSink;

use crate::agents::{build_registry, competitive_agents};

use super::{input_validator, print_report, ScenarioOptions};

pub fn definition(policy: WorkflowPolicy) -> WorkflowDefinition {
    let validator = input_validator(&policy);
    WorkflowDefinition::competitive(policy, Arc::new(CompetitiveRanking::new())).with_validator(validator)
}

/// Run the competitive workflow without printing.
pub async fn execute(options: &ScenarioOptions) -> ConclaveResult<(WorkflowState, Arc<InMemoryTraceSink>)> {
    let policy = options.policy()?;
    let registry = build_registry(competitive_agents(), policy.registry.on_duplicate)?;
    let sink = Arc::new(InMemoryTraceSink::new());
    let engine = WorkflowEngine::new(Arc::new(registry)).with_trace_sink(sink.clone());

    let state = engine.run(options.initial_state()?, &definition(policy)).await?;
    info!(run_id = %state.run_id(), status = ?state.status(), "competitive ranking finished");
    Ok((state, sink))
}

fn print_rounds(state: &WorkflowState) {
    let Some(outcome) = state
        .field(ranking_fields::RANKING_OUTCOME)
        .and_then(|v| serde_json::from_value::<RankingOutcome>(v.clone()).ok())
    else {
        return;
    };
    match outcome.phase {
        RankingPhase::Initial => println!("  Phase:                  initial scores well separated"),
        RankingPhase::HotSeat => println!(
            "  Phase:                  hot seat, {} round(s), {}",
            outcome.rounds.len(),
            if outcome.converged { "converged" } else { "round limit reached" }
        ),
    }
    for round in &outcome.rounds {
        println!(
            "    Round {}: hot seat [{}]  order [{}]",
            round.round,
            round.hot_seat.join(", "),
            round.order.join(", ")
        );
    }
}

pub async fn run_scenario(options: &ScenarioOptions) -> ConclaveResult<()> {
    println!("=== Scenario 2: Competitive Country Ranking ===");
    println!();
    println!("  Countries:              {}", options.countries().join(", "));
    println!("  Panel:                  finance, policy and grid reviewers");
    if let Some(path) = &options.research {
        println!("  Research context:       {}", path.display());
    }
    println!();

    let (state, sink) = execute(options).await?;
    print_rounds(&state);
    print_report(&state, &sink)
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, io::Write};

    use conclave_contracts::{
        ranking::parse_ranking,
        state::{RunStatus, WarningKind},
    };
    use conclave_engine::fields;

    use super::*;

    fn options(countries: &[&str]) -> ScenarioOptions {
        ScenarioOptions {
            countries: countries.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    fn outcome(state: &WorkflowState) -> RankingOutcome {
        serde_json::from_value(state.field(ranking_fields::RANKING_OUTCOME).unwrap().clone()).unwrap()
    }

    // ── Phase 1 ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_separated_countries_skip_hot_seat() {
        let (state, sink) = execute(&options(&["USA", "MEX"])).await.unwrap();
        assert_eq!(state.status(), &RunStatus::Done);

        let outcome = outcome(&state);
        assert_eq!(outcome.phase, RankingPhase::Initial);
        assert!(outcome.converged);

        let ranking = parse_ranking(state.field(fields::RANKING).unwrap()).unwrap();
        assert_eq!(ranking[0].entity, "USA");
        assert_eq!(ranking[1].entity, "MEX");
        assert!(sink.verify_integrity(&state.run_id().to_string()).unwrap());
    }

    #[tokio::test]
    async fn test_every_country_is_researched_and_presented() {
        let (state, _) = execute(&options(&["USA", "MEX"])).await.unwrap();
        for field in [ranking_fields::RESEARCH, ranking_fields::PRESENTATIONS, ranking_fields::PEER_SCORES] {
            let keyed = state.field(field).unwrap().as_object().unwrap();
            assert!(keyed.contains_key("USA") && keyed.contains_key("MEX"), "{field}");
        }
        let presentation = state.field(ranking_fields::PRESENTATIONS).unwrap()["MEX"].as_str().unwrap();
        assert!(presentation.starts_with("The case for Mexico:"));
        assert_eq!(state.field(ranking_fields::PEER_SCORES).unwrap()["USA"]["scores"].as_object().unwrap().len(), 3);
    }

    // ── Hot seat ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_close_field_goes_to_hot_seat() {
        let (state, _) = execute(&ScenarioOptions::default()).await.unwrap();
        assert_eq!(state.status(), &RunStatus::Done);

        let outcome = outcome(&state);
        assert_eq!(outcome.phase, RankingPhase::HotSeat);
        assert!(!outcome.rounds.is_empty());
        assert!(outcome.rounds.iter().all(|r| !r.hot_seat.is_empty()));
        if !outcome.converged {
            assert!(state.warnings().iter().any(|w| w.kind == WarningKind::ConvergenceWarning));
        }

        let ranking = parse_ranking(state.field(fields::RANKING).unwrap()).unwrap();
        let entities: BTreeSet<&str> = ranking.iter().map(|e| e.entity.as_str()).collect();
        assert_eq!(entities, BTreeSet::from(["BRA", "CHN", "IND", "USA"]));
        let mut ranks: Vec<u32> = ranking.iter().map(|e| e.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2, 3, 4]);

        // Eliminated countries sit below every active one.
        let first_out = ranking.iter().position(|e| e.eliminated).unwrap_or(ranking.len());
        assert!(ranking[first_out..].iter().all(|e| e.eliminated));
        assert_eq!(outcome.eliminated.len(), ranking.len() - first_out);
    }

    // ── Research context ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_research_file_flows_into_presentations() {
        let path = std::env::temp_dir().join(format!("conclave-competitive-{}.json", std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, r#"[{{"entity_name": "United States", "context": "Transmission permitting reform passed."}}]"#).unwrap();
        drop(f);

        let opts = ScenarioOptions {
            research: Some(path.clone()),
            ..options(&["USA", "MEX"])
        };
        let result = execute(&opts).await;
        std::fs::remove_file(&path).unwrap();
        let (state, _) = result.unwrap();

        let presentations = state.field(ranking_fields::PRESENTATIONS).unwrap();
        assert!(presentations["USA"].as_str().unwrap().contains("Transmission permitting reform passed."));
        assert!(!presentations["MEX"].as_str().unwrap().contains("Field research"));

        let missing: Vec<&str> = state
            .warnings()
            .iter()
            .filter(|w| w.kind == WarningKind::MissingContext)
            .map(|w| w.message.as_str())
            .collect();
        assert_eq!(missing.len(), 1);
        assert!(missing[0].contains("MEX"));
    }

    #[tokio::test]
    async fn test_missing_research_file_is_an_error() {
        let opts = ScenarioOptions {
            research: Some("/nonexistent/context.json".into()),
            ..Default::default()
        };
        assert!(execute(&opts).await.is_err());
    }
}
