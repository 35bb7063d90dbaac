//! Loads caller-supplied research context for the competitive scenario.
//!
//! Input is a JSON array of records:
//!
//! ```json
//! [
//!   { "entity_name": "United States", "context": "Strong IRA incentives..." },
//!   { "country_name": "India", "research": "Auction tariffs fell..." }
//! ]
//! ```
//!
//! Both the `{entity_name, context}` shape and the legacy
//! `{country_name, research}` shape are accepted. Names are normalized to
//! ISO3 codes; malformed, unknown or empty records are skipped with a
//! warning.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use conclave_contracts::{
    error::{ConclaveError, ConclaveResult},
    state::ContextRecord,
};

const ALIASES: &[(&str, &str)] = &[
    ("united states", "USA"),
    ("united states of america", "USA"),
    ("usa", "USA"),
    ("us", "USA"),
    ("india", "IND"),
    ("republic of india", "IND"),
    ("china", "CHN"),
    ("people's republic of china", "CHN"),
    ("prc", "CHN"),
    ("brazil", "BRA"),
    ("brasil", "BRA"),
    ("germany", "DEU"),
    ("deutschland", "DEU"),
    ("japan", "JPN"),
    ("nippon", "JPN"),
    ("united kingdom", "GBR"),
    ("uk", "GBR"),
    ("great britain", "GBR"),
    ("britain", "GBR"),
    ("france", "FRA"),
    ("canada", "CAN"),
    ("australia", "AUS"),
    ("south africa", "ZAF"),
    ("mexico", "MEX"),
    ("spain", "ESP"),
    ("italy", "ITA"),
];

/// Normalize a country name or code to its ISO3 code.
///
/// Known aliases are matched case-insensitively; any other three-letter
/// alphabetic string passes through uppercased.
pub fn normalize_entity_name(name: &str) -> Option<String> {
    let key = name.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }
    if let Some((_, code)) = ALIASES.iter().find(|(alias, _)| *alias == key) {
        return Some(code.to_string());
    }
    if key.len() == 3 && key.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(key.to_uppercase());
    }
    None
}

fn field<'a>(item: &'a Value, primary: &str, legacy: &str) -> Option<&'a str> {
    item.get(primary)
        .or_else(|| item.get(legacy))
        .and_then(Value::as_str)
}

/// Parse a JSON array of context records. Anything but an array yields no
/// records.
pub fn parse_context_records(document: &Value) -> Vec<ContextRecord> {
    let Some(items) = document.as_array() else {
        warn!("research document is not an array; ignoring it");
        return Vec::new();
    };

    let mut records = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(name) = field(item, "entity_name", "country_name") else {
            warn!(index = i, "skipping research record without an entity name");
            continue;
        };
        let Some(code) = normalize_entity_name(name) else {
            warn!(index = i, name, "skipping research record for an unrecognized country");
            continue;
        };
        let context = field(item, "context", "research").map(str::trim).unwrap_or_default();
        if context.is_empty() {
            warn!(index = i, entity = %code, "skipping empty research record");
            continue;
        }
        debug!(entity = %code, chars = context.len(), "research record loaded");
        records.push(ContextRecord {
            entity_name: code,
            context: context.to_string(),
        });
    }
    records
}

/// Read and parse a research context file.
///
/// # Errors
///
/// `ConclaveError::Config` if the file cannot be read or is not JSON.
pub fn load_context_file(path: &Path) -> ConclaveResult<Vec<ContextRecord>> {
    let text = std::fs::read_to_string(path).map_err(|e| ConclaveError::Config {
        reason: format!("cannot read research file {}: {e}", path.display()),
    })?;
    let document: Value = serde_json::from_str(&text).map_err(|e| ConclaveError::Config {
        reason: format!("research file {} is not valid JSON: {e}", path.display()),
    })?;
    Ok(parse_context_records(&document))
}

/// Keep only records for the requested entities.
pub fn filter_to(records: Vec<ContextRecord>, entities: &[String]) -> Vec<ContextRecord> {
    records
        .into_iter()
        .filter(|r| entities.contains(&r.entity_name))
        .collect()
}
