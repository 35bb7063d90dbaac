//! In-memory implementation of `TraceSink`.
//!
//! `InMemoryTraceSink` keeps one hash chain per run behind a `Mutex`, so a
//! single sink can be shared by concurrent runs. Use `export_log()` after a
//! run finishes and `verify_integrity()` at any time.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use tracing::info;

use conclave_contracts::{
    error::{ConclaveError, ConclaveResult},
    trace::StageRecord,
};
use conclave_core::traits::TraceSink;

use crate::{
    chain::{hash_entry, verify_chain},
    event::{TraceEntry, TraceLog},
};

// ── Internal mutable state ────────────────────────────────────────────────────

/// One run's chain.
#[derive(Default)]
pub(crate) struct RunChain {
    pub(crate) entries: Vec<TraceEntry>,
    pub(crate) finalized: bool,
}

impl RunChain {
    fn last_hash(&self) -> String {
        self.entries
            .last()
            .map(|e| e.this_hash.clone())
            .unwrap_or_else(|| TraceEntry::GENESIS_HASH.to_string())
    }
}

// ── Public sink ───────────────────────────────────────────────────────────────

/// An in-memory, append-only trace sink backed by per-run SHA-256 hash chains.
#[derive(Clone, Default)]
pub struct InMemoryTraceSink {
    pub(crate) runs: Arc<Mutex<BTreeMap<String, RunChain>>>,
}

impl InMemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export the chain for `run_id`, or `None` if nothing was written for it.
    pub fn export_log(&self, run_id: &str) -> ConclaveResult<Option<TraceLog>> {
        let runs = self.lock()?;
        Ok(runs.get(run_id).map(|chain| TraceLog {
            run_id: run_id.to_string(),
            entries: chain.entries.clone(),
            finalized: chain.finalized,
            exported_at: Utc::now(),
            terminal_hash: chain.entries.last().map(|e| e.this_hash.clone()).unwrap_or_default(),
        }))
    }

    /// True when the chain for `run_id` is intact. Unknown runs are trivially intact.
    pub fn verify_integrity(&self, run_id: &str) -> ConclaveResult<bool> {
        let runs = self.lock()?;
        Ok(runs.get(run_id).map_or(true, |chain| verify_chain(&chain.entries)))
    }

    pub fn run_ids(&self) -> ConclaveResult<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn lock(&self) -> ConclaveResult<std::sync::MutexGuard<'_, BTreeMap<String, RunChain>>> {
        self.runs.lock().map_err(|e| ConclaveError::StructuralViolation {
            reason: format!("trace sink lock poisoned: {}", e),
        })
    }
}

// ── TraceSink impl ────────────────────────────────────────────────────────────

impl TraceSink for InMemoryTraceSink {
    /// Append one record to the run's chain.
    ///
    /// Writing to a finalized run is rejected so a sealed log stays sealed.
    fn write(&self, run_id: &str, record: &StageRecord) -> ConclaveResult<()> {
        let mut runs = self.lock()?;
        let chain = runs.entry(run_id.to_string()).or_default();
        if chain.finalized {
            return Err(ConclaveError::StructuralViolation {
                reason: format!("trace for run '{run_id}' is already finalized"),
            });
        }

        let prev_hash = chain.last_hash();
        let sequence = chain.entries.len() as u64;
        let this_hash = hash_entry(run_id, sequence, record, &prev_hash)?;

        chain.entries.push(TraceEntry {
            sequence,
            run_id: run_id.to_string(),
            record: record.clone(),
            prev_hash,
            this_hash,
        });
        Ok(())
    }

    fn finalize(&self, run_id: &str) -> ConclaveResult<()> {
        let mut runs = self.lock()?;
        let chain = runs.entry(run_id.to_string()).or_default();
        chain.finalized = true;

        info!(
            run_id = %run_id,
            entry_count = chain.entries.len(),
            terminal_hash = %chain.last_hash(),
            "trace finalized"
        );
        Ok(())
    }
}
