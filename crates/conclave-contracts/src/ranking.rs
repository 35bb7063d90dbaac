//! Ranking records shared by ranking agents, the Verify stage, and the
//! competitive ranking protocol.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentId;

/// Strikes at which a hot-seat candidate is eliminated.
pub const DEFAULT_STRIKE_LIMIT: u8 = 3;

/// One row of a ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub entity: String,
    pub score: f64,
    /// 1-based position.
    pub rank: u32,
    #[serde(default)]
    pub eliminated: bool,
}

/// Parse a ranking field. Returns `None` when the value is not an array of
/// well-formed entries.
pub fn parse_ranking(value: &Value) -> Option<Vec<RankedEntry>> {
    serde_json::from_value(value.clone()).ok()
}

/// One peer's score for a candidate in one round (round 0 is Phase 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerScore {
    pub peer: AgentId,
    pub round: u32,
    pub score: f64,
}

/// A candidate under competitive evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingCandidate {
    pub entity: String,
    /// Every score received, in the order received.
    pub peer_scores: Vec<PeerScore>,
    pub composite: f64,
    pub strikes: u8,
    pub eliminated: bool,
    /// Current rank; frozen once eliminated.
    pub rank: u32,
}

impl RankingCandidate {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            peer_scores: Vec::new(),
            composite: 0.0,
            strikes: 0,
            eliminated: false,
            rank: 0,
        }
    }

    /// The most recent score from each peer.
    pub fn latest_scores(&self) -> BTreeMap<AgentId, f64> {
        let mut latest = BTreeMap::new();
        for s in &self.peer_scores {
            latest.insert(s.peer.clone(), s.score);
        }
        latest
    }

    /// Add a strike, saturating at `limit`. Returns true when the limit is reached.
    pub fn strike(&mut self, limit: u8) -> bool {
        self.strikes = self.strikes.saturating_add(1).min(limit);
        self.strikes >= limit
    }

    pub fn reset_strikes(&mut self) {
        self.strikes = 0;
    }

    /// Freeze the candidate at its current rank.
    pub fn eliminate(&mut self) {
        self.eliminated = true;
    }

    pub fn entry(&self) -> RankedEntry {
        RankedEntry {
            entity: self.entity.clone(),
            score: self.composite,
            rank: self.rank,
            eliminated: self.eliminated,
        }
    }
}

/// Which phase produced the final ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingPhase {
    /// Phase 1 scores were already well separated.
    Initial,
    /// Hot-seat refinement ran.
    HotSeat,
}

/// The observable state at the end of one hot-seat round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round: u32,
    /// Active candidates in rank order.
    pub order: Vec<String>,
    pub strikes: BTreeMap<String, u8>,
    pub hot_seat: Vec<String>,
    pub eliminated: Vec<String>,
}

impl RoundSnapshot {
    /// Same order and same strike counts.
    pub fn is_stable_with(&self, previous: &RoundSnapshot) -> bool {
        self.order == previous.order && self.strikes == previous.strikes
    }
}

/// Summary of a competitive ranking run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingOutcome {
    pub phase: RankingPhase,
    pub rounds: Vec<RoundSnapshot>,
    /// Eliminated candidates with their frozen rank and score.
    pub eliminated: Vec<RankedEntry>,
    pub converged: bool,
}
