//! # conclave-verify
//!
//! Verification for Conclave workflows.
//!
//! - [`input::InputValidator`] runs in the Validate stage: entity list
//!   checks, JSON Schema validation of the input document via the
//!   `jsonschema` crate, and declarative `InputRule`s (`RequiredField`,
//!   `AllowedValues`, `Custom`).
//! - [`ranking::RankingVerifier`] runs in the Verify stage and checks that a
//!   ranking is structurally usable.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use conclave_verify::input::InputValidator;
//!
//! let mut validator = InputValidator::new(2, 10).with_schema(schema);
//! validator.register_rule("iso3-codes", Box::new(|doc| {
//!     // return Some(message) to fail
//!     None
//! }));
//! let report = validator.validate(&state);
//! ```

pub mod input;
pub mod ranking;

pub use input::InputValidator;
pub use ranking::{top_gap, RankingVerifier};

// ── Tests ─────────────────────────────────────────────────────────────────────
