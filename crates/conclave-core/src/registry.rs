//! The agent registry: catalog and discovery.
//!
//! The registry is populated during process initialization through explicit
//! `register()` calls. Before a run it is moved into an `Arc`; from then on
//! only `&self` methods are reachable, so no agent can register mid-run.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use conclave_contracts::{
    agent::{AgentDescriptor, AgentId, ExecutionModel},
    capability::Capability,
    error::{ConclaveError, ConclaveResult},
};

use crate::{
    adapter::{adapt, Agent},
    unit::RawAgentUnit,
};

/// What `register` does when the id is already taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistrationPolicy {
    /// Fail with `DuplicateAgent`.
    #[default]
    Reject,
    /// Replace the existing agent in place, keeping its registration position.
    Replace,
}

/// Criteria for `list_agents`. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub capability: Option<Capability>,
    pub business_unit: Option<String>,
    pub tag: Option<String>,
    pub enabled_only: bool,
}

impl AgentFilter {
    pub fn capability(capability: Capability) -> Self {
        Self {
            capability: Some(capability),
            ..Self::default()
        }
    }

    fn matches(&self, d: &AgentDescriptor) -> bool {
        self.capability.map_or(true, |c| d.has_capability(c))
            && self
                .business_unit
                .as_deref()
                .map_or(true, |bu| d.business_unit.as_deref() == Some(bu))
            && self.tag.as_ref().map_or(true, |t| d.tags.contains(t))
            && (!self.enabled_only || d.enabled)
    }
}

/// Counts over the registered agents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStatistics {
    pub total_agents: usize,
    pub enabled_agents: usize,
    pub by_capability: BTreeMap<Capability, usize>,
    pub by_business_unit: BTreeMap<String, usize>,
    pub by_execution_model: BTreeMap<ExecutionModel, usize>,
}

/// Agents in registration order, indexed by id.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
    index: HashMap<AgentId, usize>,
    policy: RegistrationPolicy,
}

impl AgentRegistry {
    /// An empty registry that rejects duplicate ids.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RegistrationPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Adapt `unit` and store it under `descriptor.id`.
    ///
    /// # Errors
    ///
    /// - `AdapterMismatch` if the unit does not fit the declared execution model.
    /// - `DuplicateAgent` if the id is taken and the policy is `Reject`.
    pub fn register(&mut self, descriptor: AgentDescriptor, unit: RawAgentUnit) -> ConclaveResult<()> {
        let agent = adapt(descriptor, unit)?;
        let id = agent.id().clone();

        match (self.index.get(&id), self.policy) {
            (Some(_), RegistrationPolicy::Reject) => Err(ConclaveError::DuplicateAgent {
                agent_id: id.to_string(),
            }),
            (Some(&position), RegistrationPolicy::Replace) => {
                info!(agent_id = %id, position, "replacing registered agent");
                self.agents[position] = agent;
                Ok(())
            }
            (None, _) => {
                debug!(
                    agent_id = %id,
                    execution_model = %agent.descriptor().execution_model,
                    "agent registered"
                );
                self.index.insert(id, self.agents.len());
                self.agents.push(agent);
                Ok(())
            }
        }
    }

    /// Remove an agent. Later agents keep their relative order.
    pub fn unregister(&mut self, id: &AgentId) -> ConclaveResult<AgentDescriptor> {
        let position = self.index.remove(id).ok_or_else(|| ConclaveError::AgentNotFound {
            agent_id: id.to_string(),
        })?;
        let removed = self.agents.remove(position);
        self.reindex();
        info!(agent_id = %id, "agent unregistered");
        Ok(removed.descriptor().clone())
    }

    fn reindex(&mut self) {
        self.index = self
            .agents
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id().clone(), i))
            .collect();
    }

    /// Enabled agents declaring `capability`, in registration order.
    ///
    /// An empty result is not an error; the caller decides whether a missing
    /// capability is fatal.
    pub fn resolve(&self, capability: Capability, business_unit: Option<&str>) -> Vec<Agent> {
        self.agents
            .iter()
            .filter(|a| {
                let d = a.descriptor();
                d.enabled
                    && d.has_capability(capability)
                    && business_unit.map_or(true, |bu| d.business_unit.as_deref() == Some(bu))
            })
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &AgentId) -> ConclaveResult<Agent> {
        self.index
            .get(id)
            .map(|&i| self.agents[i].clone())
            .ok_or_else(|| ConclaveError::AgentNotFound {
                agent_id: id.to_string(),
            })
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.index.contains_key(id)
    }

    /// Descriptors matching `filter`, in registration order.
    pub fn list_agents(&self, filter: &AgentFilter) -> Vec<AgentDescriptor> {
        self.agents
            .iter()
            .map(|a| a.descriptor())
            .filter(|d| filter.matches(d))
            .cloned()
            .collect()
    }

    /// Case-insensitive substring search over name, description, and tags.
    pub fn search(&self, query: &str) -> Vec<AgentDescriptor> {
        let needle = query.to_lowercase();
        self.agents
            .iter()
            .map(|a| a.descriptor())
            .filter(|d| {
                d.name.to_lowercase().contains(&needle)
                    || d.description.to_lowercase().contains(&needle)
                    || d.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect()
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let mut stats = RegistryStatistics {
            total_agents: self.agents.len(),
            ..RegistryStatistics::default()
        };
        for d in self.agents.iter().map(|a| a.descriptor()) {
            if d.enabled {
                stats.enabled_agents += 1;
            }
            for c in d.capabilities.all() {
                *stats.by_capability.entry(c).or_insert(0) += 1;
            }
            if let Some(bu) = &d.business_unit {
                *stats.by_business_unit.entry(bu.clone()).or_insert(0) += 1;
            }
            *stats.by_execution_model.entry(d.execution_model).or_insert(0) += 1;
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
