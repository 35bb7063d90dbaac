//! Reducing per-peer scores to one composite per candidate.
//!
//! All functions are pure and operate on the latest score each peer gave
//! each candidate. Ordering never depends on map iteration order: equal
//! composites fall back to the configured tie-break on entity id.

use std::{cmp::Ordering, collections::BTreeMap};

use serde::{Deserialize, Serialize};

use conclave_contracts::agent::AgentId;
use conclave_policy::{AggregationRule, TieBreak};

/// Latest score per peer, per candidate.
pub type ScoreSheet = BTreeMap<String, BTreeMap<AgentId, f64>>;

/// How closely the peers agreed on one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementLevel {
    High,
    Medium,
    Low,
}

pub fn mean(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

pub fn median(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Population standard deviation.
pub fn std_dev(scores: &[f64]) -> Option<f64> {
    let m = mean(scores)?;
    let variance = scores.iter().map(|s| (s - m).powi(2)).sum::<f64>() / scores.len() as f64;
    Some(variance.sqrt())
}

/// High below 0.5, medium below 1.5, otherwise low. A single score is
/// trivially high agreement.
pub fn agreement(scores: &[f64]) -> AgreementLevel {
    match std_dev(scores) {
        Some(sd) if sd < 0.5 => AgreementLevel::High,
        Some(sd) if sd < 1.5 => AgreementLevel::Medium,
        Some(_) => AgreementLevel::Low,
        None => AgreementLevel::High,
    }
}

/// Compare two entity ids under `tie_break`.
pub fn tie_order(tie_break: TieBreak, a: &str, b: &str) -> Ordering {
    match tie_break {
        TieBreak::EntityIdAscending => a.cmp(b),
        TieBreak::EntityIdDescending => b.cmp(a),
    }
}

/// Composite score per candidate in `sheet` under `rule`.
///
/// Candidates with no scores get 0.0.
pub fn composites(rule: AggregationRule, sheet: &ScoreSheet, tie_break: TieBreak) -> BTreeMap<String, f64> {
    match rule {
        AggregationRule::Mean | AggregationRule::Median => sheet
            .iter()
            .map(|(entity, by_peer)| {
                let scores: Vec<f64> = by_peer.values().copied().collect();
                let value = match rule {
                    AggregationRule::Median => median(&scores),
                    _ => mean(&scores),
                };
                (entity.clone(), value.unwrap_or(0.0))
            })
            .collect(),
        AggregationRule::Borda => borda(sheet, tie_break),
    }
}

/// Borda count: each peer ranks the candidates it scored, best first; a
/// candidate at position `i` of `n` earns `n - 1 - i` points from that peer.
fn borda(sheet: &ScoreSheet, tie_break: TieBreak) -> BTreeMap<String, f64> {
    let mut points: BTreeMap<String, f64> = sheet.keys().map(|e| (e.clone(), 0.0)).collect();

    let mut by_peer: BTreeMap<&AgentId, Vec<(&str, f64)>> = BTreeMap::new();
    for (entity, scores) in sheet {
        for (peer, score) in scores {
            by_peer.entry(peer).or_default().push((entity.as_str(), *score));
        }
    }

    for ballot in by_peer.values_mut() {
        ballot.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| tie_order(tie_break, a.0, b.0)));
        let n = ballot.len();
        for (i, (entity, _)) in ballot.iter().enumerate() {
            if let Some(p) = points.get_mut(*entity) {
                *p += (n - 1 - i) as f64;
            }
        }
    }
    points
}

/// Entity ids sorted by composite descending, then by `tie_break`.
pub fn rank_order(composites: &BTreeMap<String, f64>, tie_break: TieBreak) -> Vec<String> {
    let mut entries: Vec<(&String, f64)> = composites.iter().map(|(e, s)| (e, *s)).collect();
    entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| tie_order(tie_break, a.0, b.0)));
    entries.into_iter().map(|(e, _)| e.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(rows: &[(&str, &[(&str, f64)])]) -> ScoreSheet {
        rows.iter()
            .map(|(entity, scores)| {
                (
                    entity.to_string(),
                    scores.iter().map(|(p, s)| (AgentId::new(*p), *s)).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_mean_and_median() {
        assert_eq!(mean(&[9.0, 7.0, 8.0]), Some(8.0));
        assert_eq!(median(&[9.0, 1.0, 8.0]), Some(8.0));
        assert_eq!(median(&[9.0, 1.0, 8.0, 2.0]), Some(5.0));
        assert_eq!(mean(&[]), None);
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_median_resists_an_outlier_peer() {
        let s = sheet(&[
            ("USA", &[("p1", 8.0), ("p2", 8.0), ("p3", 0.0)]),
            ("IND", &[("p1", 7.0), ("p2", 7.0), ("p3", 7.0)]),
        ]);
        let by_mean = composites(AggregationRule::Mean, &s, TieBreak::EntityIdAscending);
        let by_median = composites(AggregationRule::Median, &s, TieBreak::EntityIdAscending);
        assert_eq!(rank_order(&by_mean, TieBreak::EntityIdAscending), vec!["IND", "USA"]);
        assert_eq!(rank_order(&by_median, TieBreak::EntityIdAscending), vec!["USA", "IND"]);
    }

    #[test]
    fn test_borda_points() {
        let s = sheet(&[
            ("A", &[("p1", 9.0), ("p2", 5.0)]),
            ("B", &[("p1", 8.0), ("p2", 9.0)]),
            ("C", &[("p1", 1.0), ("p2", 1.0)]),
        ]);
        let points = composites(AggregationRule::Borda, &s, TieBreak::EntityIdAscending);
        // p1: A 2, B 1, C 0; p2: B 2, A 1, C 0
        assert_eq!(points["A"], 3.0);
        assert_eq!(points["B"], 3.0);
        assert_eq!(points["C"], 0.0);
        assert_eq!(rank_order(&points, TieBreak::EntityIdAscending), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_tie_break_is_explicit() {
        let equal: BTreeMap<String, f64> =
            [("CHN", 5.0), ("BRA", 5.0), ("USA", 7.0)].iter().map(|(e, s)| (e.to_string(), *s)).collect();
        assert_eq!(rank_order(&equal, TieBreak::EntityIdAscending), vec!["USA", "BRA", "CHN"]);
        assert_eq!(rank_order(&equal, TieBreak::EntityIdDescending), vec!["USA", "CHN", "BRA"]);
    }

    #[test]
    fn test_unscored_candidate_composite_is_zero() {
        let s = sheet(&[("A", &[]), ("B", &[("p1", 4.0)])]);
        let c = composites(AggregationRule::Mean, &s, TieBreak::EntityIdAscending);
        assert_eq!(c["A"], 0.0);
        assert_eq!(c["B"], 4.0);
    }

    #[test]
    fn test_agreement_levels() {
        assert_eq!(agreement(&[8.0, 8.2, 7.9]), AgreementLevel::High);
        assert_eq!(agreement(&[6.0, 8.0]), AgreementLevel::Medium);
        assert_eq!(agreement(&[2.0, 9.0]), AgreementLevel::Low);
        assert_eq!(agreement(&[]), AgreementLevel::High);
    }
}
