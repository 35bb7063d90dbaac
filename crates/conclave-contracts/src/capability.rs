//! Capability tags.
//!
//! A capability describes what kind of work an agent performs. Stages select
//! agents by capability, never by id, so a deployment can swap one data
//! loader for another without touching the workflow definition.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

/// The kinds of work a registered agent can declare.
///
/// Serialized in snake_case (`"data_load"`, `"peer_review"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    DataLoad,
    Analysis,
    Aggregation,
    Ranking,
    Verification,
    Explanation,
    Research,
    ExpertPresentation,
    PeerReview,
    Challenge,
    Defense,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 11] = [
        Capability::DataLoad,
        Capability::Analysis,
        Capability::Aggregation,
        Capability::Ranking,
        Capability::Verification,
        Capability::Explanation,
        Capability::Research,
        Capability::ExpertPresentation,
        Capability::PeerReview,
        Capability::Challenge,
        Capability::Defense,
    ];

    /// The snake_case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::DataLoad => "data_load",
            Capability::Analysis => "analysis",
            Capability::Aggregation => "aggregation",
            Capability::Ranking => "ranking",
            Capability::Verification => "verification",
            Capability::Explanation => "explanation",
            Capability::Research => "research",
            Capability::ExpertPresentation => "expert_presentation",
            Capability::PeerReview => "peer_review",
            Capability::Challenge => "challenge",
            Capability::Defense => "defense",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of capabilities an agent declares.
///
/// Ordered so that descriptor serialization and listings are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    inner: BTreeSet<Capability>,
}

impl CapabilitySet {
    /// Add a capability to this set.
    pub fn grant(&mut self, capability: Capability) {
        self.inner.insert(capability);
    }

    /// Return true if the set contains the given capability.
    pub fn has(&self, capability: Capability) -> bool {
        self.inner.contains(&capability)
    }

    /// Return an iterator over all declared capabilities.
    pub fn all(&self) -> impl Iterator<Item = Capability> + '_ {
        self.inner.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}
