//! The candidate board a competitive ranking run mutates round by round.
//!
//! Active candidates always hold ranks `1..=k`. Eliminated candidates hold
//! the ranks below them, assigned once at elimination and never recomputed:
//! a round that eliminates `j` candidates while `k` remain active freezes
//! them at `k + 1 ..= k + j`, so the full ranking stays contiguous.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use conclave_contracts::{
    agent::AgentId,
    ranking::{PeerScore, RankedEntry, RankingCandidate, RoundSnapshot},
};
use conclave_policy::RankingSection;

use crate::aggregate::{agreement, composites, rank_order, ScoreSheet};

pub struct Board {
    candidates: Vec<RankingCandidate>,
    settings: RankingSection,
}

impl Board {
    pub fn new(entities: &[String], settings: RankingSection) -> Self {
        Self {
            candidates: entities.iter().map(RankingCandidate::new).collect(),
            settings,
        }
    }

    pub fn settings(&self) -> &RankingSection {
        &self.settings
    }

    pub fn get(&self, entity: &str) -> Option<&RankingCandidate> {
        self.candidates.iter().find(|c| c.entity == entity)
    }

    fn get_mut(&mut self, entity: &str) -> Option<&mut RankingCandidate> {
        self.candidates.iter_mut().find(|c| c.entity == entity)
    }

    pub fn active_count(&self) -> usize {
        self.candidates.iter().filter(|c| !c.eliminated).count()
    }

    /// Active candidates in rank order.
    pub fn order(&self) -> Vec<String> {
        let mut active: Vec<&RankingCandidate> = self.candidates.iter().filter(|c| !c.eliminated).collect();
        active.sort_by_key(|c| c.rank);
        active.into_iter().map(|c| c.entity.clone()).collect()
    }

    /// Composites of the active candidates, best first.
    pub fn scores_desc(&self) -> Vec<f64> {
        self.order()
            .iter()
            .filter_map(|e| self.get(e).map(|c| c.composite))
            .collect()
    }

    /// Record one peer's score sheet for `round`.
    ///
    /// Only active candidates are scored, and only those in `only` when it is
    /// given. Non-numeric and non-finite scores are ignored. Returns how many
    /// scores were recorded.
    pub fn record(
        &mut self,
        peer: &AgentId,
        round: u32,
        scores: &Map<String, Value>,
        only: Option<&[String]>,
    ) -> usize {
        let mut recorded = 0;
        for (entity, value) in scores {
            if only.is_some_and(|allowed| !allowed.contains(entity)) {
                continue;
            }
            let Some(score) = value.as_f64().filter(|s| s.is_finite()) else {
                continue;
            };
            if let Some(candidate) = self.get_mut(entity).filter(|c| !c.eliminated) {
                candidate.peer_scores.push(PeerScore {
                    peer: peer.clone(),
                    round,
                    score,
                });
                recorded += 1;
            }
        }
        recorded
    }

    /// Active candidates, restricted to `only` when given, that hold no peer
    /// score for `round`.
    pub fn unscored(&self, round: u32, only: Option<&[String]>) -> Vec<String> {
        self.candidates
            .iter()
            .filter(|c| !c.eliminated)
            .filter(|c| only.map_or(true, |allowed| allowed.contains(&c.entity)))
            .filter(|c| !c.peer_scores.iter().any(|s| s.round == round))
            .map(|c| c.entity.clone())
            .collect()
    }

    /// Recompute composites over the active set and assign ranks `1..=k`.
    pub fn rerank(&mut self) {
        let sheet: ScoreSheet = self
            .candidates
            .iter()
            .filter(|c| !c.eliminated)
            .map(|c| (c.entity.clone(), c.latest_scores()))
            .collect();
        let composites = composites(self.settings.aggregation, &sheet, self.settings.tie_break);
        let order = rank_order(&composites, self.settings.tie_break);

        for (i, entity) in order.iter().enumerate() {
            let composite = composites.get(entity).copied().unwrap_or(0.0);
            if let Some(c) = self.get_mut(entity) {
                c.composite = composite;
                c.rank = i as u32 + 1;
            }
        }
    }

    /// Apply the defense gate to one hot-seat candidate. Returns true when
    /// the candidate reached the strike limit.
    pub fn judge(&mut self, entity: &str, improved: bool) -> bool {
        let limit = self.settings.strike_limit;
        match self.get_mut(entity) {
            Some(c) if improved => {
                c.reset_strikes();
                false
            }
            Some(c) => c.strike(limit),
            None => false,
        }
    }

    /// Eliminate `entities`, freeze their ranks below the remaining active
    /// set, and re-rank the survivors.
    pub fn eliminate(&mut self, entities: &[String]) {
        if entities.is_empty() {
            return;
        }
        let mut doomed: Vec<(u32, String)> = entities
            .iter()
            .filter_map(|e| self.get(e).filter(|c| !c.eliminated).map(|c| (c.rank, e.clone())))
            .collect();
        doomed.sort();

        let remaining = (self.active_count() - doomed.len()) as u32;
        for (i, (_, entity)) in doomed.iter().enumerate() {
            if let Some(c) = self.get_mut(entity) {
                c.eliminate();
                c.rank = remaining + i as u32 + 1;
            }
        }
        self.rerank();
    }

    pub fn snapshot(&self, round: u32, hot_seat: Vec<String>) -> RoundSnapshot {
        RoundSnapshot {
            round,
            order: self.order(),
            strikes: self
                .candidates
                .iter()
                .filter(|c| !c.eliminated)
                .map(|c| (c.entity.clone(), c.strikes))
                .collect(),
            hot_seat,
            eliminated: self.eliminated().into_iter().map(|e| e.entity).collect(),
        }
    }

    /// Active candidates in rank order, then eliminated ones by frozen rank.
    pub fn ranking(&self) -> Vec<RankedEntry> {
        let mut entries: Vec<RankedEntry> = self.candidates.iter().map(RankingCandidate::entry).collect();
        entries.sort_by_key(|e| e.rank);
        entries
    }

    pub fn eliminated(&self) -> Vec<RankedEntry> {
        let mut out: Vec<RankedEntry> = self
            .candidates
            .iter()
            .filter(|c| c.eliminated)
            .map(RankingCandidate::entry)
            .collect();
        out.sort_by_key(|e| e.rank);
        out
    }

    /// Per-candidate score summary written to the `peer_scores` field.
    pub fn score_summary(&self) -> Value {
        let summary: Map<String, Value> = self
            .candidates
            .iter()
            .map(|c| {
                let latest = c.latest_scores();
                let values: Vec<f64> = latest.values().copied().collect();
                let by_peer: BTreeMap<&str, f64> = latest.iter().map(|(p, s)| (p.as_str(), *s)).collect();
                (
                    c.entity.clone(),
                    json!({
                        "scores": by_peer,
                        "history": c.peer_scores,
                        "composite": c.composite,
                        "agreement": agreement(&values),
                        "strikes": c.strikes,
                        "eliminated": c.eliminated,
                    }),
                )
            })
            .collect();
        Value::Object(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(scores: &[(&str, f64)]) -> Board {
        let entities: Vec<String> = scores.iter().map(|(e, _)| e.to_string()).collect();
        let mut b = Board::new(&entities, RankingSection::default());
        let sheet: Map<String, Value> = scores.iter().map(|(e, s)| (e.to_string(), json!(s))).collect();
        b.record(&AgentId::new("peer"), 0, &sheet, None);
        b.rerank();
        b
    }

    #[test]
    fn test_rerank_orders_by_composite() {
        let b = board(&[("B", 5.0), ("A", 9.0), ("C", 1.0)]);
        assert_eq!(b.order(), vec!["A", "B", "C"]);
        assert_eq!(b.scores_desc(), vec![9.0, 5.0, 1.0]);
    }

    #[test]
    fn test_record_ignores_unknown_and_non_numeric_scores() {
        let mut b = board(&[("A", 9.0), ("B", 5.0)]);
        let sheet = json!({ "A": "high", "ZZZ": 3.0, "B": 6.0 });
        let recorded = b.record(&AgentId::new("other"), 1, sheet.as_object().unwrap(), None);
        assert_eq!(recorded, 1);
    }

    #[test]
    fn test_record_restricted_to_hot_seat() {
        let mut b = board(&[("A", 9.0), ("B", 5.0)]);
        let sheet = json!({ "A": 1.0, "B": 6.0 });
        b.record(&AgentId::new("peer"), 1, sheet.as_object().unwrap(), Some(&["B".to_string()]));
        b.rerank();
        assert_eq!(b.get("A").unwrap().composite, 9.0);
        assert_eq!(b.get("B").unwrap().composite, 6.0);
    }

    #[test]
    fn test_unscored_lists_candidates_without_a_round_score() {
        let mut b = board(&[("A", 9.0), ("B", 5.0), ("C", 1.0)]);
        assert!(b.unscored(0, None).is_empty());
        assert_eq!(b.unscored(1, None), vec!["A", "B", "C"]);

        let sheet = json!({ "A": 8.0, "C": "n/a" });
        b.record(&AgentId::new("peer"), 1, sheet.as_object().unwrap(), None);
        assert_eq!(b.unscored(1, None), vec!["B", "C"]);
        assert_eq!(b.unscored(1, Some(&["A".to_string(), "C".to_string()])), vec!["C"]);

        b.eliminate(&["C".to_string()]);
        assert_eq!(b.unscored(1, None), vec!["B"]);
    }

    #[test]
    fn test_strikes_reset_on_improvement() {
        let mut b = board(&[("A", 9.0), ("B", 5.0)]);
        assert!(!b.judge("B", false));
        assert!(!b.judge("B", false));
        assert_eq!(b.get("B").unwrap().strikes, 2);
        assert!(!b.judge("B", true));
        assert_eq!(b.get("B").unwrap().strikes, 0);
    }

    #[test]
    fn test_elimination_freezes_contiguous_ranks() {
        let mut b = board(&[("A", 9.0), ("B", 8.0), ("C", 7.0), ("D", 6.0), ("E", 5.0)]);
        b.eliminate(&["E".to_string(), "D".to_string()]);
        assert_eq!(b.order(), vec!["A", "B", "C"]);
        assert_eq!(b.get("D").unwrap().rank, 4);
        assert_eq!(b.get("E").unwrap().rank, 5);

        b.eliminate(&["C".to_string()]);
        let ranks: Vec<(String, u32, bool)> =
            b.ranking().into_iter().map(|e| (e.entity, e.rank, e.eliminated)).collect();
        assert_eq!(
            ranks,
            vec![
                ("A".to_string(), 1, false),
                ("B".to_string(), 2, false),
                ("C".to_string(), 3, true),
                ("D".to_string(), 4, true),
                ("E".to_string(), 5, true),
            ]
        );
    }

    #[test]
    fn test_eliminated_candidate_is_no_longer_scored() {
        let mut b = board(&[("A", 9.0), ("B", 5.0), ("C", 1.0)]);
        b.eliminate(&["C".to_string()]);
        let sheet = json!({ "C": 10.0 });
        assert_eq!(b.record(&AgentId::new("peer"), 2, sheet.as_object().unwrap(), None), 0);
        assert_eq!(b.get("C").unwrap().rank, 3);
    }

    #[test]
    fn test_snapshot_tracks_active_strikes_only() {
        let mut b = board(&[("A", 9.0), ("B", 5.0), ("C", 1.0)]);
        b.judge("C", false);
        let snap = b.snapshot(1, vec!["C".to_string()]);
        assert_eq!(snap.strikes.get("C"), Some(&1));

        b.eliminate(&["C".to_string()]);
        let snap = b.snapshot(2, vec![]);
        assert!(!snap.strikes.contains_key("C"));
        assert_eq!(snap.eliminated, vec!["C"]);
    }
}
