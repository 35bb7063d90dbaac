//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (bytes, in order):
//!   1. run_id as UTF-8 bytes
//!   2. sequence as 8-byte little-endian
//!   3. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   4. canonical JSON of the stage record (serde_json, no pretty-printing)

use sha2::{Digest, Sha256};

use conclave_contracts::{
    error::{ConclaveError, ConclaveResult},
    trace::StageRecord,
};

use crate::event::TraceEntry;

/// Compute the SHA-256 hash for a single trace entry.
///
/// Returns a lowercase 64-character hex string.
pub fn hash_entry(
    run_id: &str,
    sequence: u64,
    record: &StageRecord,
    prev_hash: &str,
) -> ConclaveResult<String> {
    let record_json = serde_json::to_vec(record).map_err(|e| ConclaveError::StructuralViolation {
        reason: format!("stage record is not serializable: {e}"),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&record_json);

    Ok(hex::encode(hasher.finalize()))
}

/// Verify the integrity of a hash chain.
///
/// Returns `true` when every entry's `prev_hash` equals the preceding
/// entry's `this_hash` (or `GENESIS_HASH` for entry 0), every `sequence`
/// matches its position, and every `this_hash` matches the value recomputed
/// from the entry's own fields. An empty chain is valid.
pub fn verify_chain(entries: &[TraceEntry]) -> bool {
    let mut expected_prev = TraceEntry::GENESIS_HASH.to_string();

    for (position, entry) in entries.iter().enumerate() {
        if entry.sequence != position as u64 || entry.prev_hash != expected_prev {
            return false;
        }

        match hash_entry(&entry.run_id, entry.sequence, &entry.record, &entry.prev_hash) {
            Ok(recomputed) if recomputed == entry.this_hash => {}
            _ => return false,
        }

        expected_prev = entry.this_hash.clone();
    }

    true
}
