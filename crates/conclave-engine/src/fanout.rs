//! Bounded concurrent fan-out.
//!
//! Every task runs on its own tokio task behind a shared semaphore, so at
//! most `max_concurrency` invocations are in flight at once and one slow
//! invocation never blocks its siblings beyond its own descriptor timeout.
//! Results are returned in task order regardless of completion order.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Instant,
};

use serde_json::{Map, Value};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, warn};

use conclave_contracts::{
    agent::AgentId,
    error::AgentError,
    state::PartialUpdate,
    view::StateView,
};
use conclave_core::Agent;

/// One invocation in a fan-out.
#[derive(Debug, Clone)]
pub struct FanOutTask {
    /// Item key used for the keyed merge (entity id, location id, ...).
    pub key: String,
    pub agent: Agent,
    pub view: StateView,
}

impl FanOutTask {
    pub fn new(key: impl Into<String>, agent: Agent, view: StateView) -> Self {
        Self {
            key: key.into(),
            agent,
            view,
        }
    }
}

/// The raw result of one fan-out task.
#[derive(Debug, Clone)]
pub struct FanOutResult {
    pub key: String,
    pub agent_id: AgentId,
    /// Output keys the agent declares; failed items write null under each.
    pub declared: BTreeSet<String>,
    pub result: Result<PartialUpdate, AgentError>,
    pub elapsed_ms: u64,
}

impl FanOutResult {
    pub fn output(&self) -> Option<&PartialUpdate> {
        self.result.as_ref().ok()
    }
}

/// Run `tasks` with at most `max_concurrency` in flight.
///
/// With `stop_on_failure`, the first failed task ends the fan-out: the
/// remaining tasks are aborted when the join set is dropped and only the
/// results gathered so far are returned.
pub async fn run_bounded(
    tasks: Vec<FanOutTask>,
    max_concurrency: usize,
    stop_on_failure: bool,
) -> Vec<FanOutResult> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut set = JoinSet::new();
    let mut pending: Vec<(String, AgentId, BTreeSet<String>)> = Vec::with_capacity(tasks.len());

    for (index, task) in tasks.into_iter().enumerate() {
        let FanOutTask { key, agent, view } = task;
        pending.push((
            key.clone(),
            agent.id().clone(),
            agent.descriptor().output_keys.clone(),
        ));
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let started = Instant::now();
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => agent.invoke(view).await,
                Err(_) => Err(AgentError::execution("concurrency limiter closed")),
            };
            (index, result, started.elapsed().as_millis() as u64)
        });
    }

    let mut finished: BTreeMap<usize, FanOutResult> = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        let (index, result, elapsed_ms) = match joined {
            Ok(done) => done,
            Err(e) => {
                // The adapter catches panics, so this only happens on abort.
                warn!(error = %e, "fan-out task did not complete");
                continue;
            }
        };
        let (key, agent_id, declared) = pending[index].clone();
        let failed = result.is_err();
        finished.insert(
            index,
            FanOutResult {
                key,
                agent_id,
                declared,
                result,
                elapsed_ms,
            },
        );
        if failed && stop_on_failure {
            debug!(index, "fan-out stopping on first failure");
            return finished.into_values().collect();
        }
    }

    // Tasks that never reported back are failures of their own.
    for (index, (key, agent_id, declared)) in pending.into_iter().enumerate() {
        finished.entry(index).or_insert_with(|| FanOutResult {
            key,
            agent_id,
            declared,
            result: Err(AgentError::panicked("fan-out task terminated without a result")),
            elapsed_ms: 0,
        });
    }
    finished.into_values().collect()
}

/// Keyed merge: each declared output field becomes an object keyed by item.
///
/// `{"locations": [...]}` returned for item `USA` lands at
/// `locations.USA`. Failed items write null under every declared field.
pub fn keyed_update(results: &[FanOutResult]) -> PartialUpdate {
    let mut fields: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
    for r in results {
        for field in &r.declared {
            let value = r
                .output()
                .and_then(|out| out.get(field))
                .cloned()
                .unwrap_or(Value::Null);
            fields.entry(field.clone()).or_default().insert(r.key.clone(), value);
        }
    }
    fields
        .into_iter()
        .map(|(k, items)| (k, Value::Object(items)))
        .collect()
}

/// Flat merge for fan-outs without items: the union of every output.
/// Failed agents write null under their declared fields.
pub fn flat_update(results: &[FanOutResult]) -> PartialUpdate {
    let mut update = PartialUpdate::new();
    for r in results {
        match r.output() {
            Some(out) => update.extend(out.iter().map(|(k, v)| (k.clone(), v.clone()))),
            None => {
                for field in &r.declared {
                    update.entry(field.clone()).or_insert(Value::Null);
                }
            }
        }
    }
    update
}
