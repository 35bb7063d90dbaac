//! Read-only state views handed to agents.

use std::{collections::BTreeMap, sync::Arc};

use serde_json::Value;

use crate::state::WorkflowState;

/// The fan-out item an invocation is working on.
pub const CURRENT_ITEM: &str = "current_item";
/// Key of the current fan-out item (entity id, location id, ...).
pub const CURRENT_ITEM_ID: &str = "current_item_id";
/// Research context for the current entity, when the caller supplied one.
pub const CURRENT_CONTEXT: &str = "current_context";

/// An immutable snapshot of the workflow state plus per-invocation overlay
/// fields such as the current fan-out item.
///
/// Cheap to clone: the snapshot is shared, only the overlay is copied.
#[derive(Debug, Clone)]
pub struct StateView {
    base: Arc<WorkflowState>,
    overlay: BTreeMap<String, Value>,
}

impl StateView {
    pub fn new(base: Arc<WorkflowState>) -> Self {
        Self {
            base,
            overlay: BTreeMap::new(),
        }
    }

    /// Add an overlay field visible only to this view.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.overlay.insert(key.into(), value);
        self
    }

    /// Overlay fields shadow state fields of the same name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.overlay.get(key).or_else(|| self.base.field(key))
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn item(&self) -> Option<&Value> {
        self.get(CURRENT_ITEM)
    }

    pub fn item_id(&self) -> Option<&str> {
        self.get_str(CURRENT_ITEM_ID)
    }

    pub fn state(&self) -> &WorkflowState {
        &self.base
    }
}
