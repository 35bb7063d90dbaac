//! Structural checks on a ranking produced by the Rank stage.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use conclave_contracts::{
    ranking::{parse_ranking, RankedEntry},
    verify::{VerificationFailure, VerificationReport},
};

/// Checks that a ranking is usable: non-empty, every input entity ranked,
/// only known entities, no duplicates, finite scores, and ranks forming 1..=n.
pub struct RankingVerifier<'a> {
    entities: &'a [String],
}

impl<'a> RankingVerifier<'a> {
    pub fn new(entities: &'a [String]) -> Self {
        Self { entities }
    }

    /// Verify `ranking`, the raw field value. `None` means the field is absent.
    pub fn verify(&self, ranking: Option<&Value>) -> VerificationReport {
        let failures = match ranking.filter(|v| !v.is_null()) {
            None => vec![VerificationFailure::new("ranking-present", "no ranking was produced")],
            Some(value) => match parse_ranking(value) {
                None => vec![VerificationFailure::new(
                    "ranking-well-formed",
                    "ranking is not a list of {entity, score, rank} entries",
                )],
                Some(entries) => self.check_entries(&entries),
            },
        };

        let report = VerificationReport::from_failures(failures);
        debug!(passed = report.passed, failure_count = report.failures.len(), "ranking verified");
        report
    }

    fn check_entries(&self, entries: &[RankedEntry]) -> Vec<VerificationFailure> {
        let mut failures = Vec::new();
        if entries.is_empty() {
            failures.push(VerificationFailure::new("ranking-present", "ranking is empty"));
            return failures;
        }

        let known: BTreeSet<&str> = self.entities.iter().map(String::as_str).collect();
        let mut seen = BTreeSet::new();
        for entry in entries {
            if !known.contains(entry.entity.as_str()) {
                failures.push(VerificationFailure::new(
                    "ranking-known-entity",
                    format!("ranking contains unknown entity '{}'", entry.entity),
                ));
            }
            if !seen.insert(entry.entity.as_str()) {
                failures.push(VerificationFailure::new(
                    "ranking-unique",
                    format!("entity '{}' is ranked more than once", entry.entity),
                ));
            }
            if !entry.score.is_finite() {
                failures.push(VerificationFailure::new(
                    "ranking-finite-score",
                    format!("entity '{}' has a non-finite score", entry.entity),
                ));
            }
        }

        for entity in self.entities {
            if !seen.contains(entity.as_str()) {
                failures.push(VerificationFailure::new(
                    "ranking-complete",
                    format!("entity '{entity}' is missing from the ranking"),
                ));
            }
        }

        let mut ranks: Vec<u32> = entries.iter().map(|e| e.rank).collect();
        ranks.sort_unstable();
        let expected: Vec<u32> = (1..=entries.len() as u32).collect();
        if ranks != expected {
            failures.push(VerificationFailure::new(
                "ranking-contiguous",
                format!("ranks {ranks:?} do not form 1..={}", entries.len()),
            ));
        }

        failures
    }
}

/// Score gap between rank 1 and rank 2, if both exist.
pub fn top_gap(ranking: &Value) -> Option<f64> {
    let mut entries = parse_ranking(ranking)?;
    entries.sort_by_key(|e| e.rank);
    match entries.as_slice() {
        [first, second, ..] => Some((first.score - second.score).abs()),
        _ => None,
    }
}
