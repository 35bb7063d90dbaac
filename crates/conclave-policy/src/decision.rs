//! Pure decision predicates.
//!
//! Each function here maps plain numbers to a decision. None of them call an
//! agent, so every branch of the workflow is reproducible from a state
//! snapshot and the policy alone.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::VerifySection;

/// The result of a Verify evaluation, stored in state as `verify_outcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyOutcome {
    Pass,
    /// Top candidates too close to call; emit two recommendations.
    Ambiguous,
    /// Failed but retryable with budget left.
    Retry,
    /// Failed after the retry budget; the existing ranking is accepted with a warning.
    DegradedPass,
    /// No usable ranking and nothing left to try.
    Fail,
}

impl fmt::Display for VerifyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerifyOutcome::Pass => "pass",
            VerifyOutcome::Ambiguous => "ambiguous",
            VerifyOutcome::Retry => "retry",
            VerifyOutcome::DegradedPass => "degraded_pass",
            VerifyOutcome::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Facts the Verify stage gathers from state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifyFacts {
    /// A ranking field exists and parses.
    pub ranking_present: bool,
    /// Every structural check on the ranking passed.
    pub checks_passed: bool,
    /// Whether the latest ranking failure may succeed on another attempt.
    pub retryable: bool,
    /// Score gap between rank 1 and rank 2, if there are two entries.
    pub top_gap: Option<f64>,
    /// Retries already spent.
    pub retries_used: u32,
}

/// Decide the Verify outcome.
///
/// Retry is chosen only while `retries_used < max_retries`, so the number of
/// Verify evaluations in a run never exceeds `max_retries + 1`.
pub fn evaluate_verification(policy: &VerifySection, facts: &VerifyFacts) -> VerifyOutcome {
    if facts.ranking_present && facts.checks_passed {
        return match facts.top_gap {
            Some(gap) if gap <= policy.ambiguity_threshold => VerifyOutcome::Ambiguous,
            _ => VerifyOutcome::Pass,
        };
    }

    if facts.retryable && facts.retries_used < policy.max_retries {
        VerifyOutcome::Retry
    } else if facts.ranking_present {
        VerifyOutcome::DegradedPass
    } else {
        VerifyOutcome::Fail
    }
}

/// Phase 1 gate: true when every adjacent gap in the descending score list
/// exceeds `threshold`. Fewer than two scores are trivially satisfactory.
pub fn is_satisfactory(scores_desc: &[f64], threshold: f64) -> bool {
    scores_desc
        .windows(2)
        .all(|pair| pair[0] - pair[1] > threshold)
}

/// Phase 2 gate: the defense improved the candidate when its composite rose
/// by more than `margin` or its rank got better.
pub fn defense_improved(
    before_score: f64,
    after_score: f64,
    before_rank: u32,
    after_rank: u32,
    margin: f64,
) -> bool {
    after_score > before_score + margin || after_rank < before_rank
}

/// Hot-seat size for a round: the configured size capped at half the active
/// set, at least one while two or more candidates are active.
pub fn hot_seat_size(configured: usize, active: usize) -> usize {
    if active < 2 {
        return 0;
    }
    configured.min(active / 2).max(1)
}
