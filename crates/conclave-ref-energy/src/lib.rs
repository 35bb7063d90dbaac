//! # conclave-ref-energy
//!
//! Renewable-energy reference deployment for the Conclave orchestration core.
//!
//! Ranks countries for renewable-energy investment two ways:
//!
//! 1. **Standard pipeline**: load candidate sites per country, compute
//!    project-finance metrics per site, aggregate per country, rank, verify
//!    and narrate.
//! 2. **Competitive ranking**: research and present each country, score the
//!    presentations with a panel of peer reviewers, and refine a close
//!    ranking with hot-seat rounds.
//!
//! All data is hardcoded and approximate. No external API calls are made.

pub mod agents;
pub mod mock_data;
pub mod research_loader;
pub mod scenarios;

/// Per-country averages written by the Aggregate stage.
pub const COUNTRY_METRICS: &str = "country_metrics";
