//! Trace entry and log types.
//!
//! `TraceEntry` is a single link in a run's hash chain: it wraps a
//! `StageRecord` with a sequence number and the SHA-256 hashes that make
//! tampering detectable. `TraceLog` is the sealed export of one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conclave_contracts::trace::StageRecord;

/// A single entry in the SHA-256 hash chain for one run.
///
/// Modifying any field, including those of the embedded `record`,
/// invalidates `this_hash` and every later `prev_hash`, which
/// `verify_chain` detects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Position in the chain, starting at 0.
    pub sequence: u64,

    pub run_id: String,

    pub record: StageRecord,

    /// Hash of the previous entry, or `GENESIS_HASH` for the first.
    pub prev_hash: String,

    /// Hash over (run_id, sequence, prev_hash, canonical JSON of record).
    pub this_hash: String,
}

impl TraceEntry {
    /// The `prev_hash` of the first entry in every chain: 64 hex zeros.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// A sealed trace for a single run.
///
/// `terminal_hash` is the `this_hash` of the last entry and commits to the
/// whole log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceLog {
    pub run_id: String,

    /// Entries in chain order (sequence 0 first).
    pub entries: Vec<TraceEntry>,

    pub finalized: bool,

    /// Wall-clock time (UTC) of the export.
    pub exported_at: DateTime<Utc>,

    /// Empty string if the log is empty.
    pub terminal_hash: String,
}
