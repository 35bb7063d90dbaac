//! # conclave-policy
//!
//! TOML-driven workflow policy and the pure decision predicates the engine
//! and the ranking protocol branch on.
//!
//! ## Overview
//!
//! [`WorkflowPolicy`] holds every tunable of a run: fan-out concurrency,
//! stage timeouts, the partial-failure policy, retry bounds, and the ranking
//! thresholds. The [`decision`] module turns facts gathered from state into
//! decisions (`VerifyOutcome`, the Phase 1 gate, the defense gate).
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use conclave_policy::WorkflowPolicy;
//!
//! let policy = WorkflowPolicy::from_file(Path::new("policies/energy.toml"))?;
//! ```

pub mod config;
pub mod decision;

pub use config::{
    AggregationRule, EngineSection, PartialFailurePolicy, RankingSection, RegistrySection,
    TieBreak, ValidationSection, VerifySection, WorkflowPolicy,
};
pub use decision::{
    defense_improved, evaluate_verification, hot_seat_size, is_satisfactory, VerifyFacts,
    VerifyOutcome,
};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use conclave_contracts::error::ConclaveError;
    use conclave_core::RegistrationPolicy;

    use crate::{
        defense_improved, evaluate_verification, hot_seat_size, is_satisfactory, AggregationRule,
        PartialFailurePolicy, TieBreak, VerifyFacts, VerifyOutcome, VerifySection, WorkflowPolicy,
    };

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn facts(present: bool, passed: bool, retryable: bool, gap: Option<f64>, used: u32) -> VerifyFacts {
        VerifyFacts {
            ranking_present: present,
            checks_passed: passed,
            retryable,
            top_gap: gap,
            retries_used: used,
        }
    }

    // ── 1. Loading ────────────────────────────────────────────────────────────

    /// An empty document yields the documented defaults.
    #[test]
    fn test_empty_toml_uses_defaults() {
        let policy = WorkflowPolicy::from_toml_str("").unwrap();
        assert_eq!(policy, WorkflowPolicy::default());
        assert_eq!(policy.engine.max_concurrency, 4);
        assert_eq!(policy.engine.stage_timeout_secs, 600);
        assert_eq!(policy.engine.partial_failure, PartialFailurePolicy::RecordAndSkip);
        assert_eq!(policy.verify.max_retries, 3);
        assert_eq!(policy.ranking.aggregation, AggregationRule::Mean);
        assert_eq!(policy.ranking.strike_limit, 3);
        assert_eq!(policy.registry.on_duplicate, RegistrationPolicy::Reject);
    }

    #[test]
    fn test_partial_sections_override_only_named_fields() {
        let toml = r#"
            [engine]
            partial_failure = "abort-stage"

            [ranking]
            aggregation = "borda"
            tie_break = "entity-id-descending"
            max_rounds = 5

            [registry]
            on_duplicate = "replace"
        "#;
        let policy = WorkflowPolicy::from_toml_str(toml).unwrap();

        assert_eq!(policy.engine.partial_failure, PartialFailurePolicy::AbortStage);
        assert_eq!(policy.engine.max_concurrency, 4);
        assert_eq!(policy.ranking.aggregation, AggregationRule::Borda);
        assert_eq!(policy.ranking.tie_break, TieBreak::EntityIdDescending);
        assert_eq!(policy.ranking.max_rounds, 5);
        assert_eq!(policy.ranking.hot_seat_size, 2);
        assert_eq!(policy.registry.on_duplicate, RegistrationPolicy::Replace);
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let result = WorkflowPolicy::from_toml_str("[engine\nmax_concurrency = ");
        match result {
            Err(ConclaveError::Config { reason }) => {
                assert!(reason.contains("failed to parse"), "got: {reason}");
            }
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_enum_value_is_config_error() {
        let result = WorkflowPolicy::from_toml_str("[ranking]\naggregation = \"geometric\"");
        assert!(matches!(result, Err(ConclaveError::Config { .. })));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        for toml in [
            "[engine]\nmax_concurrency = 0",
            "[validation]\nmin_entities = 5\nmax_entities = 2",
            "[ranking]\nhot_seat_size = 0",
            "[ranking]\nstrike_limit = 0",
        ] {
            let result = WorkflowPolicy::from_toml_str(toml);
            assert!(
                matches!(result, Err(ConclaveError::Config { .. })),
                "expected Config error for {toml:?}"
            );
        }
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = WorkflowPolicy::from_file(std::path::Path::new("/nonexistent/policy.toml"));
        match result {
            Err(ConclaveError::Config { reason }) => assert!(reason.contains("failed to read")),
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    // ── 2. Verify outcome ─────────────────────────────────────────────────────

    #[test]
    fn test_verify_pass_and_ambiguous() {
        let policy = VerifySection {
            max_retries: 3,
            ambiguity_threshold: 0.5,
        };
        assert_eq!(
            evaluate_verification(&policy, &facts(true, true, true, Some(2.0), 0)),
            VerifyOutcome::Pass
        );
        assert_eq!(
            evaluate_verification(&policy, &facts(true, true, true, Some(0.5), 0)),
            VerifyOutcome::Ambiguous
        );
        // A single-entry ranking has no gap and passes.
        assert_eq!(
            evaluate_verification(&policy, &facts(true, true, true, None, 0)),
            VerifyOutcome::Pass
        );
    }

    #[test]
    fn test_verify_retry_is_bounded() {
        let policy = VerifySection::default();
        let mut evaluations = 0;
        let mut used = 0;
        loop {
            evaluations += 1;
            match evaluate_verification(&policy, &facts(true, false, true, None, used)) {
                VerifyOutcome::Retry => used += 1,
                outcome => {
                    assert_eq!(outcome, VerifyOutcome::DegradedPass);
                    break;
                }
            }
        }
        assert_eq!(evaluations, policy.max_retries + 1);
    }

    #[test]
    fn test_verify_non_retryable_failures() {
        let policy = VerifySection::default();
        assert_eq!(
            evaluate_verification(&policy, &facts(false, false, false, None, 0)),
            VerifyOutcome::Fail
        );
        assert_eq!(
            evaluate_verification(&policy, &facts(true, false, false, None, 0)),
            VerifyOutcome::DegradedPass
        );
        assert_eq!(
            evaluate_verification(&policy, &facts(false, false, true, None, 3)),
            VerifyOutcome::Fail
        );
    }

    // ── 3. Ranking gates ──────────────────────────────────────────────────────

    #[test]
    fn test_satisfactory_gate() {
        assert!(is_satisfactory(&[9.0, 5.0, 1.0], 1.0));
        assert!(!is_satisfactory(&[9.0, 8.9, 8.8], 1.0));
        assert!(!is_satisfactory(&[9.0, 5.0, 4.5], 1.0));
        assert!(is_satisfactory(&[7.0], 1.0));
        assert!(is_satisfactory(&[], 1.0));
    }

    #[test]
    fn test_defense_improved() {
        assert!(defense_improved(8.8, 8.9, 3, 3, 0.0));
        assert!(!defense_improved(8.8, 8.8, 3, 3, 0.0));
        assert!(!defense_improved(8.8, 8.85, 3, 3, 0.1));
        assert!(defense_improved(8.8, 8.8, 3, 2, 0.1));
    }

    #[test]
    fn test_hot_seat_size_caps_at_half_active() {
        assert_eq!(hot_seat_size(2, 3), 1);
        assert_eq!(hot_seat_size(2, 4), 2);
        assert_eq!(hot_seat_size(3, 10), 3);
        assert_eq!(hot_seat_size(2, 2), 1);
        assert_eq!(hot_seat_size(2, 1), 0);
    }
}
