//! # conclave-trace
//!
//! Append-only, SHA-256 hash-chained execution trace for Conclave workflow
//! runs.
//!
//! ## Overview
//!
//! The engine always keeps a plain trace in each run's metadata. When a
//! `TraceSink` is attached, the same stage records are also forwarded here,
//! where each one is wrapped in a `TraceEntry` linked to the previous entry
//! by hash. Editing any stored record breaks the chain and is detected by
//! `verify_chain`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conclave_trace::InMemoryTraceSink;
//!
//! let sink = InMemoryTraceSink::new();
//! let engine = WorkflowEngine::new(registry).with_trace_sink(Arc::new(sink.clone()));
//! let state = engine.run(initial, &definition).await?;
//!
//! let run_id = state.run_id().to_string();
//! assert!(sink.verify_integrity(&run_id)?);
//! let log = sink.export_log(&run_id)?;
//! ```

pub mod chain;
pub mod event;
pub mod memory;

pub use chain::{hash_entry, verify_chain};
pub use event::{TraceEntry, TraceLog};
pub use memory::InMemoryTraceSink;

// ── Tests ─────────────────────────────────────────────────────────────────────
