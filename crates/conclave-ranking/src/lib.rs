//! # conclave-ranking
//!
//! Competitive ranking for Conclave: candidates are researched, presented
//! by an expert agent each, and scored by a panel of peer reviewers. When
//! the scores do not separate the candidates clearly, hot-seat rounds
//! challenge the bottom of the ranking until it stabilizes.
//!
//! `CompetitiveRanking` is a `StageProcedure`; plug it into a workflow with
//! `WorkflowDefinition::competitive`.
//!
//! ```rust,ignore
//! let definition = WorkflowDefinition::competitive(policy, Arc::new(CompetitiveRanking::new()));
//! let state = engine.run(WorkflowState::new(["USA", "IND", "CHN"]), &definition).await?;
//! ```

pub mod aggregate;
pub mod board;
pub mod protocol;

pub use aggregate::{agreement, composites, rank_order, AgreementLevel, ScoreSheet};
pub use board::Board;
pub use protocol::{fields, keys, CompetitiveRanking};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use serde_json::{json, Map, Value};

    use conclave_contracts::{
        agent::{AgentDescriptor, ExecutionModel},
        capability::Capability,
        error::AgentError,
        ranking::{parse_ranking, RankingOutcome, RankingPhase},
        state::{RunStatus, Stage, WarningKind, WorkflowState},
    };
    use conclave_core::{AgentRegistry, RawAgentUnit};
    use conclave_engine::{
        fields::{self as engine_fields, RANKING},
        WorkflowDefinition, WorkflowEngine,
    };
    use conclave_policy::WorkflowPolicy;

    use super::{fields, keys, CompetitiveRanking};

    // ── Helpers ───────────────────────────────────────────────────────────────

    type Part = (AgentDescriptor, RawAgentUnit);
    type Table = &'static [(&'static str, f64)];

    #[derive(Clone, Default)]
    struct Calls(Arc<Mutex<u32>>);

    impl Calls {
        fn hit(&self) {
            *self.0.lock().unwrap() += 1;
        }

        fn count(&self) -> u32 {
            *self.0.lock().unwrap()
        }
    }

    fn mock(id: &str, capability: Capability, produces: &str) -> AgentDescriptor {
        AgentDescriptor::new(id, id, ExecutionModel::PlainFunction)
            .capability(capability)
            .produces(produces)
            .timeout(Duration::from_millis(900))
    }

    fn researcher(fail_for: Option<&'static str>) -> Part {
        let d = mock("researcher", Capability::Research, keys::RESEARCH);
        let unit = RawAgentUnit::sync_fn(move |view| {
            let entity = view.item_id().unwrap_or_default().to_string();
            if fail_for == Some(entity.as_str()) {
                return Err(AgentError::execution(format!("no sources found for {entity}")));
            }
            Ok(json!({ "research": { "entity": entity, "sources": 3 } }))
        });
        (d, unit)
    }

    fn presenter() -> Part {
        let d = mock("presenter", Capability::ExpertPresentation, keys::PRESENTATION);
        let unit = RawAgentUnit::sync_fn(|view| {
            let entity = view.item_id().unwrap_or_default();
            let backed = view.has(keys::CURRENT_RESEARCH);
            Ok(json!({ "presentation": format!("the case for {entity} (researched: {backed})") }))
        });
        (d, unit)
    }

    /// Scores from `table`. In hot-seat rounds only the hot seat is
    /// re-scored, and a candidate with a defense gains `boost`.
    fn peer(id: &str, table: Table, boost: f64) -> Part {
        let d = mock(id, Capability::PeerReview, keys::SCORES);
        let unit = RawAgentUnit::sync_fn(move |view| {
            let round = view.get(keys::ROUND).and_then(Value::as_u64).unwrap_or(0);
            let mut scores = Map::new();
            for (entity, base) in table {
                if round == 0 {
                    scores.insert(entity.to_string(), json!(base));
                    continue;
                }
                let hot = view
                    .get(keys::HOT_SEAT)
                    .and_then(Value::as_array)
                    .is_some_and(|h| h.iter().any(|e| e == entity));
                if hot {
                    let defended = view.get(keys::DEFENSES).is_some_and(|d| !d[*entity].is_null());
                    let score = if defended { base + boost } else { *base };
                    scores.insert(entity.to_string(), json!(score));
                }
            }
            Ok(json!({ "scores": scores }))
        });
        (d, unit)
    }

    /// A reviewer that cannot be reached for the first `outages` calls, then
    /// scores from `table`. With `scores_hot_seat` false it stays down in
    /// every hot-seat round.
    fn unreliable_peer(id: &str, table: Table, outages: u32, scores_hot_seat: bool, calls: &Calls) -> Part {
        let calls = calls.clone();
        let d = mock(id, Capability::PeerReview, keys::SCORES);
        let unit = RawAgentUnit::sync_fn(move |view| {
            calls.hit();
            let round = view.get(keys::ROUND).and_then(Value::as_u64).unwrap_or(0);
            if calls.count() <= outages || (round > 0 && !scores_hot_seat) {
                return Err(AgentError::network("review service unreachable"));
            }
            let scores: Map<String, Value> = table.iter().map(|(e, s)| (e.to_string(), json!(s))).collect();
            Ok(json!({ "scores": scores }))
        });
        (d, unit)
    }

    fn withheld(state: &WorkflowState) -> Vec<&str> {
        state
            .errors()
            .iter()
            .filter(|e| e.message.contains("ranking withheld"))
            .map(|e| e.message.as_str())
            .collect()
    }

    fn challenger(calls: &Calls) -> Part {
        let calls = calls.clone();
        let d = mock("challenger", Capability::Challenge, keys::CHALLENGE);
        let unit = RawAgentUnit::sync_fn(move |view| {
            calls.hit();
            let entity = view.item_id().unwrap_or_default();
            let by = view.get_str(keys::CHALLENGER).unwrap_or("anonymous");
            Ok(json!({ "challenge": format!("{by} questions the case for {entity}") }))
        });
        (d, unit)
    }

    fn defender(calls: &Calls) -> Part {
        let calls = calls.clone();
        let d = mock("defender", Capability::Defense, keys::DEFENSE);
        let unit = RawAgentUnit::sync_fn(move |view| {
            calls.hit();
            let answered = view.get(keys::CHALLENGES).and_then(Value::as_array).map_or(0, Vec::len);
            Ok(json!({ "defense": format!("answered {answered} challenges") }))
        });
        (d, unit)
    }

    struct Panel {
        parts: Vec<Part>,
        challenges: Calls,
        defenses: Calls,
    }

    fn panel(peers: Vec<Part>, fail_research_for: Option<&'static str>) -> Panel {
        let challenges = Calls::default();
        let defenses = Calls::default();
        let mut parts = vec![
            researcher(fail_research_for),
            presenter(),
            challenger(&challenges),
            defender(&defenses),
        ];
        parts.extend(peers);
        Panel {
            parts,
            challenges,
            defenses,
        }
    }

    async fn run(parts: Vec<Part>, policy: WorkflowPolicy, entities: &[&str]) -> WorkflowState {
        let mut registry = AgentRegistry::new();
        for (d, u) in parts {
            registry.register(d, u).unwrap();
        }
        let engine = WorkflowEngine::new(Arc::new(registry));
        let definition = WorkflowDefinition::competitive(policy, Arc::new(CompetitiveRanking::new()));
        engine
            .run(WorkflowState::new(entities.iter().copied()), &definition)
            .await
            .unwrap()
    }

    fn outcome(state: &WorkflowState) -> RankingOutcome {
        serde_json::from_value(state.field(fields::RANKING_OUTCOME).cloned().unwrap()).unwrap()
    }

    fn ranked(state: &WorkflowState) -> Vec<(String, u32, bool)> {
        parse_ranking(state.field(RANKING).unwrap())
            .unwrap()
            .into_iter()
            .map(|e| (e.entity, e.rank, e.eliminated))
            .collect()
    }

    fn has_warning(state: &WorkflowState, kind: WarningKind) -> bool {
        state.warnings().iter().any(|w| w.kind == kind)
    }

    const SEPARATED: Table = &[("A", 9.0), ("B", 5.0), ("C", 1.0)];
    const CLOSE_P1: Table = &[("A", 9.2), ("B", 8.8), ("C", 8.9)];
    const CLOSE_P2: Table = &[("A", 8.8), ("B", 9.0), ("C", 8.7)];
    const CLOSE: Table = &[("A", 9.0), ("B", 8.9), ("C", 8.8)];
    const FIVE: Table = &[("A", 9.0), ("B", 8.8), ("C", 8.6), ("D", 8.4), ("E", 8.2)];

    // ── Phase 1 ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_separated_scores_end_after_initial_evaluation() {
        let p = panel(vec![peer("peer-1", SEPARATED, 0.0)], None);
        let state = run(p.parts, WorkflowPolicy::default(), &["A", "B", "C"]).await;

        assert_eq!(state.status(), &RunStatus::Done);
        assert_eq!(
            ranked(&state),
            vec![
                ("A".to_string(), 1, false),
                ("B".to_string(), 2, false),
                ("C".to_string(), 3, false),
            ]
        );
        let o = outcome(&state);
        assert_eq!(o.phase, RankingPhase::Initial);
        assert!(o.rounds.is_empty());
        assert!(o.converged);
        assert_eq!(p.challenges.count(), 0);
        assert_eq!(p.defenses.count(), 0);
    }

    #[tokio::test]
    async fn test_every_candidate_is_researched_and_presented() {
        let p = panel(vec![peer("peer-1", SEPARATED, 0.0)], None);
        let state = run(p.parts, WorkflowPolicy::default(), &["A", "B", "C"]).await;

        let research = state.field(fields::RESEARCH).unwrap();
        let presentations = state.field(fields::PRESENTATIONS).unwrap();
        for entity in ["A", "B", "C"] {
            assert_eq!(research[entity]["entity"], entity);
            assert!(presentations[entity].as_str().unwrap().contains("researched: true"));
        }
        let summary = state.field(fields::PEER_SCORES).unwrap();
        assert_eq!(summary["A"]["scores"]["peer-1"], 9.0);
        assert_eq!(summary["A"]["agreement"], "high");
    }

    #[tokio::test]
    async fn test_failed_research_is_null_and_run_continues() {
        let p = panel(vec![peer("peer-1", SEPARATED, 0.0)], Some("B"));
        let state = run(p.parts, WorkflowPolicy::default(), &["A", "B", "C"]).await;

        assert_eq!(state.status(), &RunStatus::Done);
        let research = state.field(fields::RESEARCH).unwrap();
        assert!(research["B"].is_null());
        assert!(!research["A"].is_null());

        assert_eq!(state.errors().len(), 1);
        let err = &state.errors()[0];
        assert_eq!(err.stage, Stage::Rank);
        assert_eq!(err.item.as_deref(), Some("B"));
        assert!(!err.retryable);

        let presentations = state.field(fields::PRESENTATIONS).unwrap();
        assert!(presentations["B"].as_str().unwrap().contains("researched: false"));
    }

    #[tokio::test]
    async fn test_missing_peer_reviewers_fail_the_run() {
        let p = panel(vec![], None);
        let state = run(p.parts, WorkflowPolicy::default(), &["A", "B"]).await;
        match state.status() {
            RunStatus::Failed { stage, .. } => assert_eq!(*stage, Stage::Rank),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unscored_candidates_are_not_ranked_and_retry_is_bounded() {
        let calls = Calls::default();
        let mut policy = WorkflowPolicy::default();
        policy.verify.max_retries = 2;
        let p = panel(vec![unreliable_peer("peer-1", SEPARATED, u32::MAX, true, &calls)], None);
        let state = run(p.parts, policy, &["A", "B", "C"]).await;

        assert!(state.is_failed());
        assert_eq!(state.path().last(), Some(&Stage::Failed));
        assert!(!state.has(RANKING));
        assert!(!state.has(fields::RANKING_OUTCOME));

        assert_eq!(state.path().iter().filter(|s| **s == Stage::Retry).count(), 2);
        assert_eq!(state.counter(engine_fields::VERIFY_EVALUATIONS), 3);
        assert_eq!(state.field(engine_fields::VERIFY_OUTCOME), Some(&json!("fail")));
        assert_eq!(calls.count(), 3);

        let messages = withheld(&state);
        assert_eq!(messages.len(), 3);
        assert!(messages[0].contains("round 0: no peer scores for A, B, C"), "{}", messages[0]);
        assert!(state.errors().iter().filter(|e| e.message.contains("ranking withheld")).all(|e| e.retryable));
        assert_eq!(p.challenges.count(), 0);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_peer_outage() {
        let calls = Calls::default();
        let p = panel(vec![unreliable_peer("peer-1", SEPARATED, 1, true, &calls)], None);
        let state = run(p.parts, WorkflowPolicy::default(), &["A", "B", "C"]).await;

        assert_eq!(state.status(), &RunStatus::Done);
        assert_eq!(state.path().iter().filter(|s| **s == Stage::Retry).count(), 1);
        assert_eq!(state.counter(engine_fields::VERIFY_EVALUATIONS), 2);
        assert_eq!(withheld(&state).len(), 1);
        assert_eq!(
            ranked(&state),
            vec![
                ("A".to_string(), 1, false),
                ("B".to_string(), 2, false),
                ("C".to_string(), 3, false),
            ]
        );
        assert_eq!(outcome(&state).phase, RankingPhase::Initial);
    }

    // ── Phase 2 ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_unimproved_bottom_candidate_is_eliminated() {
        let p = panel(
            vec![peer("peer-1", CLOSE_P1, 0.0), peer("peer-2", CLOSE_P2, 0.0)],
            None,
        );
        let state = run(p.parts, WorkflowPolicy::default(), &["A", "B", "C"]).await;

        assert_eq!(state.status(), &RunStatus::Done);
        let o = outcome(&state);
        assert_eq!(o.phase, RankingPhase::HotSeat);
        assert_eq!(o.rounds.len(), 3);
        assert!(!o.converged);

        assert_eq!(o.rounds[0].hot_seat, vec!["C"]);
        assert_eq!(o.rounds[0].strikes.get("C"), Some(&1));
        assert_eq!(o.rounds[1].strikes.get("C"), Some(&2));
        assert_eq!(o.rounds[2].eliminated, vec!["C"]);
        assert_eq!(o.rounds[2].order, vec!["A", "B"]);

        assert_eq!(
            ranked(&state),
            vec![
                ("A".to_string(), 1, false),
                ("B".to_string(), 2, false),
                ("C".to_string(), 3, true),
            ]
        );
        assert!(has_warning(&state, WarningKind::ConvergenceWarning));
        // One challenge per peer per round, one defense per round.
        assert_eq!(p.challenges.count(), 6);
        assert_eq!(p.defenses.count(), 3);
    }

    #[tokio::test]
    async fn test_improving_defense_stabilizes_the_ranking() {
        let p = panel(vec![peer("peer-1", CLOSE, 0.02)], None);
        let state = run(p.parts, WorkflowPolicy::default(), &["A", "B", "C"]).await;

        let o = outcome(&state);
        assert_eq!(o.phase, RankingPhase::HotSeat);
        assert_eq!(o.rounds.len(), 1);
        assert!(o.converged);
        assert!(o.eliminated.is_empty());
        assert_eq!(o.rounds[0].strikes.get("C"), Some(&0));
        assert!(!has_warning(&state, WarningKind::ConvergenceWarning));
    }

    #[tokio::test]
    async fn test_eliminations_are_monotonic_and_ranks_frozen() {
        let mut policy = WorkflowPolicy::default();
        policy.ranking.max_rounds = 6;
        let p = panel(vec![peer("peer-1", FIVE, 0.0)], None);
        let state = run(p.parts, policy, &["A", "B", "C", "D", "E"]).await;

        let o = outcome(&state);
        assert_eq!(o.rounds.len(), 6);
        assert_eq!(o.rounds[0].hot_seat, vec!["D", "E"]);
        assert_eq!(o.rounds[3].hot_seat, vec!["C"]);

        let mut gone: Vec<String> = Vec::new();
        for round in &o.rounds {
            assert!(round.eliminated.starts_with(&gone), "round {} resurrected a candidate", round.round);
            for entity in &round.order {
                assert!(!gone.contains(entity), "{entity} active after elimination");
            }
            gone = round.eliminated.clone();
        }

        assert_eq!(
            ranked(&state),
            vec![
                ("A".to_string(), 1, false),
                ("B".to_string(), 2, false),
                ("C".to_string(), 3, true),
                ("D".to_string(), 4, true),
                ("E".to_string(), 5, true),
            ]
        );
        assert!(!o.converged);
    }

    #[tokio::test]
    async fn test_unscored_hot_seat_is_never_struck() {
        let calls = Calls::default();
        let mut policy = WorkflowPolicy::default();
        policy.verify.max_retries = 1;
        let p = panel(vec![unreliable_peer("peer-1", CLOSE, 0, false, &calls)], None);
        let state = run(p.parts, policy, &["A", "B", "C"]).await;

        assert!(state.is_failed());
        assert!(!state.has(RANKING));
        assert!(!state.has(fields::RANKING_OUTCOME));
        // Each attempt reaches round 1: one challenge and one defense, then
        // the panel goes silent.
        assert_eq!(p.challenges.count(), 2);
        assert_eq!(p.defenses.count(), 2);

        let messages = withheld(&state);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.contains("round 1: no peer scores for C")), "{messages:?}");
        let summary = state.field(fields::PEER_SCORES).unwrap();
        assert_eq!(summary["C"]["strikes"], 0);
        assert_eq!(summary["C"]["eliminated"], false);
    }

    #[tokio::test]
    async fn test_hot_seat_without_challenger_fails_the_run() {
        let parts = vec![researcher(None), presenter(), peer("peer-1", CLOSE, 0.0)];
        let state = run(parts, WorkflowPolicy::default(), &["A", "B", "C"]).await;
        match state.status() {
            RunStatus::Failed { stage, cause } => {
                assert_eq!(*stage, Stage::Rank);
                assert!(cause.contains("challenge"), "unexpected cause: {cause}");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_two_candidates_one_round_limit() {
        let mut policy = WorkflowPolicy::default();
        policy.ranking.max_rounds = 1;
        let p = panel(vec![peer("peer-1", &[("A", 7.0), ("B", 6.5)], 0.0)], None);
        let state = run(p.parts, policy, &["A", "B"]).await;

        let o = outcome(&state);
        assert_eq!(o.rounds.len(), 1);
        assert_eq!(o.rounds[0].hot_seat, vec!["B"]);
        assert!(!o.converged);
        assert!(has_warning(&state, WarningKind::ConvergenceWarning));
        assert_eq!(state.status(), &RunStatus::Done);
    }
}
