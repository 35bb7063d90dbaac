//! # conclave-core
//!
//! The adapter layer and agent registry of the Conclave orchestration core.
//!
//! This crate provides:
//! - `RawAgentUnit`, the three execution models an agent can be supplied as
//! - `adapt()` and `Agent`, which put every model behind one `invoke` signature
//! - `AgentRegistry`, the catalog stages resolve agents from by capability
//! - The trait seams (`ToolRunnable`, `NestedWorkflow`, `TraceSink`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conclave_core::{AgentRegistry, RawAgentUnit};
//!
//! let mut registry = AgentRegistry::new();
//! registry.register(descriptor, RawAgentUnit::sync_fn(|view| Ok(json!({"ranking": []}))))?;
//! let registry = Arc::new(registry); // read-only from here on
//! ```

pub mod adapter;
pub mod registry;
pub mod traits;
pub mod unit;

pub use adapter::{adapt, Agent};
pub use registry::{AgentFilter, AgentRegistry, RegistrationPolicy, RegistryStatistics};
pub use unit::RawAgentUnit;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use conclave_contracts::{
        agent::{AgentDescriptor, AgentId, ExecutionModel},
        capability::Capability,
        error::{AgentError, AgentErrorKind, ConclaveError},
        state::WorkflowState,
        view::{StateView, CURRENT_ITEM},
    };

    use crate::{
        adapt,
        traits::{NestedWorkflow, ToolRunnable},
        AgentFilter, AgentRegistry, RawAgentUnit, RegistrationPolicy,
    };

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn descriptor(id: &str, capability: Capability) -> AgentDescriptor {
        AgentDescriptor::new(id, id, ExecutionModel::PlainFunction)
            .capability(capability)
            .produces("out")
    }

    fn constant(value: Value) -> RawAgentUnit {
        RawAgentUnit::sync_fn(move |_| Ok(json!({ "out": value.clone() })))
    }

    fn view() -> StateView {
        StateView::new(Arc::new(WorkflowState::new(["USA", "IND"])))
    }

    /// A chain that echoes its input and counts calls.
    struct EchoChain {
        calls: Arc<Mutex<u32>>,
        reply: Value,
    }

    #[async_trait]
    impl ToolRunnable for EchoChain {
        async fn run(&self, input: Value) -> Result<Value, AgentError> {
            *self.calls.lock().unwrap() += 1;
            if self.reply.is_null() {
                Ok(input)
            } else {
                Ok(self.reply.clone())
            }
        }
    }

    /// A nested workflow that doubles a number.
    struct Doubler;

    #[async_trait]
    impl NestedWorkflow for Doubler {
        async fn run_nested(
            &self,
            inputs: BTreeMap<String, Value>,
        ) -> Result<BTreeMap<String, Value>, AgentError> {
            let n = inputs
                .get("n")
                .and_then(Value::as_f64)
                .ok_or_else(|| AgentError::execution("n missing"))?;
            let mut out = BTreeMap::new();
            out.insert("doubled".to_string(), json!(n * 2.0));
            out.insert("internal".to_string(), json!("not mapped"));
            Ok(out)
        }
    }

    // ── Adapter ───────────────────────────────────────────────────────────────

    #[test]
    fn adapt_rejects_model_mismatch() {
        let d = AgentDescriptor::new("chain", "Chain", ExecutionModel::ToolAugmented);
        let result = adapt(d, constant(json!(1)));
        match result {
            Err(ConclaveError::AdapterMismatch { expected, actual, .. }) => {
                assert_eq!(expected, ExecutionModel::ToolAugmented);
                assert_eq!(actual, ExecutionModel::PlainFunction);
            }
            other => panic!("expected AdapterMismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invoke_plain_function_returns_partial_update() {
        let agent = adapt(descriptor("a", Capability::Analysis), constant(json!(42))).unwrap();
        let update = agent.invoke(view()).await.unwrap();
        assert_eq!(update.get("out"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn invoke_reports_missing_required_inputs_without_running() {
        let calls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&calls);
        let unit = RawAgentUnit::sync_fn(move |_| {
            *counter.lock().unwrap() += 1;
            Ok(json!({ "out": 1 }))
        });
        let d = descriptor("a", Capability::Analysis).requires("locations");
        let agent = adapt(d, unit).unwrap();

        let err = agent.invoke(view()).await.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::MissingInput);
        assert!(!err.retryable);
        assert!(err.message.contains("locations"));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn invoke_overlay_satisfies_required_inputs() {
        let unit = RawAgentUnit::sync_fn(|v| Ok(json!({ "out": v.item().cloned() })));
        let d = descriptor("a", Capability::Analysis).requires(CURRENT_ITEM);
        let agent = adapt(d, unit).unwrap();

        let update = agent.invoke(view().with(CURRENT_ITEM, json!("USA"))).await.unwrap();
        assert_eq!(update.get("out"), Some(&json!("USA")));
    }

    #[tokio::test]
    async fn invoke_converts_timeout() {
        let unit = RawAgentUnit::function(|_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({ "out": 1 }))
        });
        let d = descriptor("slow", Capability::Research).timeout(Duration::from_millis(20));
        let agent = adapt(d, unit).unwrap();

        let err = agent.invoke(view()).await.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::Timeout);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn invoke_converts_panic() {
        let unit = RawAgentUnit::sync_fn(|_| panic!("formula blew up"));
        let agent = adapt(descriptor("p", Capability::Analysis), unit).unwrap();

        let err = agent.invoke(view()).await.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::Panicked);
        assert!(err.message.contains("formula blew up"));
    }

    #[tokio::test]
    async fn invoke_rejects_non_object_and_undeclared_fields() {
        let agent = adapt(
            descriptor("s", Capability::Analysis),
            RawAgentUnit::sync_fn(|_| Ok(json!("text"))),
        )
        .unwrap();
        assert_eq!(agent.invoke(view()).await.unwrap_err().kind, AgentErrorKind::MalformedOutput);

        let agent = adapt(
            descriptor("u", Capability::Analysis),
            RawAgentUnit::sync_fn(|_| Ok(json!({ "out": 1, "ranking": [] }))),
        )
        .unwrap();
        let err = agent.invoke(view()).await.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::MalformedOutput);
        assert!(err.message.contains("ranking"));
    }

    #[tokio::test]
    async fn invoke_disabled_agent_fails() {
        let d = descriptor("off", Capability::Analysis).disabled();
        let agent = adapt(d, constant(json!(1))).unwrap();
        let err = agent.invoke(view()).await.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::Execution);
    }

    #[tokio::test]
    async fn tool_chain_wraps_bare_result_under_output_key() {
        let calls = Arc::new(Mutex::new(0u32));
        let chain = Arc::new(EchoChain {
            calls: Arc::clone(&calls),
            reply: json!("Solar leads in IND."),
        });
        let d = AgentDescriptor::new("writer", "Writer", ExecutionModel::ToolAugmented)
            .capability(Capability::Explanation)
            .produces("insights");
        let unit = RawAgentUnit::tool_chain(chain, "entities", "insights", vec!["search".into()]);
        let agent = adapt(d, unit).unwrap();

        let update = agent.invoke(view()).await.unwrap();
        assert_eq!(update.get("insights"), Some(&json!("Solar leads in IND.")));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn tool_chain_receives_input_key_and_tools() {
        let chain = Arc::new(EchoChain {
            calls: Arc::new(Mutex::new(0)),
            reply: Value::Null,
        });
        // Echoed input object has keys "entities" and "tools", so declare both.
        let d = AgentDescriptor::new("echo", "Echo", ExecutionModel::ToolAugmented)
            .produces("entities")
            .produces("tools");
        let unit = RawAgentUnit::tool_chain(chain, "entities", "out", vec!["search".into()]);
        let agent = adapt(d, unit).unwrap();

        let update = agent.invoke(view()).await.unwrap();
        assert_eq!(update.get("entities"), Some(&json!(["USA", "IND"])));
        assert_eq!(update.get("tools"), Some(&json!(["search"])));
    }

    #[tokio::test]
    async fn sub_workflow_maps_fields_both_ways() {
        let d = AgentDescriptor::new("nested", "Nested", ExecutionModel::SubWorkflow)
            .requires("n")
            .produces("result");
        let input_mapping = [("n".to_string(), "n".to_string())].into_iter().collect();
        let output_mapping = [("doubled".to_string(), "result".to_string())].into_iter().collect();
        let unit = RawAgentUnit::sub_workflow(Arc::new(Doubler), input_mapping, output_mapping);
        let agent = adapt(d, unit).unwrap();

        let update = agent.invoke(view().with("n", json!(21.0))).await.unwrap();
        assert_eq!(update.get("result"), Some(&json!(42.0)));
        assert!(!update.contains_key("internal"));
    }

    // ── Registry ──────────────────────────────────────────────────────────────

    #[test]
    fn register_rejects_duplicate_by_default() {
        let mut registry = AgentRegistry::new();
        registry.register(descriptor("dup", Capability::Ranking), constant(json!(1))).unwrap();

        let result = registry.register(descriptor("dup", Capability::Ranking), constant(json!(2)));
        match result {
            Err(ConclaveError::DuplicateAgent { agent_id }) => assert_eq!(agent_id, "dup"),
            other => panic!("expected DuplicateAgent, got {:?}", other),
        }
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn replace_policy_keeps_position_and_swaps_body() {
        let mut registry = AgentRegistry::with_policy(RegistrationPolicy::Replace);
        registry.register(descriptor("first", Capability::Ranking), constant(json!(1))).unwrap();
        registry.register(descriptor("second", Capability::Ranking), constant(json!(2))).unwrap();
        registry.register(descriptor("first", Capability::Ranking), constant(json!(3))).unwrap();

        let resolved = registry.resolve(Capability::Ranking, None);
        let ids: Vec<&str> = resolved.iter().map(|a| a.id().as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);

        let update = resolved[0].invoke(view()).await.unwrap();
        assert_eq!(update.get("out"), Some(&json!(3)));
    }

    #[test]
    fn resolve_never_returns_duplicate_ids() {
        for policy in [RegistrationPolicy::Reject, RegistrationPolicy::Replace] {
            let mut registry = AgentRegistry::with_policy(policy);
            for id in ["a", "b", "a", "c", "b", "a"] {
                let _ = registry.register(descriptor(id, Capability::PeerReview), constant(json!(0)));
            }
            let resolved = registry.resolve(Capability::PeerReview, None);
            let mut ids: Vec<String> = resolved.iter().map(|a| a.id().to_string()).collect();
            assert_eq!(ids, vec!["a", "b", "c"]);
            ids.dedup();
            assert_eq!(ids.len(), 3);
        }
    }

    #[test]
    fn resolve_filters_capability_business_unit_and_enabled() {
        let mut registry = AgentRegistry::new();
        registry
            .register(
                descriptor("fin", Capability::Analysis).business_unit("financial_team"),
                constant(json!(1)),
            )
            .unwrap();
        registry
            .register(
                descriptor("data", Capability::Analysis).business_unit("data_team"),
                constant(json!(1)),
            )
            .unwrap();
        registry
            .register(descriptor("off", Capability::Analysis).disabled(), constant(json!(1)))
            .unwrap();
        registry.register(descriptor("rank", Capability::Ranking), constant(json!(1))).unwrap();

        assert_eq!(registry.resolve(Capability::Analysis, None).len(), 2);
        let fin = registry.resolve(Capability::Analysis, Some("financial_team"));
        assert_eq!(fin.len(), 1);
        assert_eq!(fin[0].id().as_str(), "fin");
        assert!(registry.resolve(Capability::Explanation, None).is_empty());
    }

    #[test]
    fn get_missing_agent_fails() {
        let registry = AgentRegistry::new();
        match registry.get(&AgentId::new("ghost")) {
            Err(ConclaveError::AgentNotFound { agent_id }) => assert_eq!(agent_id, "ghost"),
            other => panic!("expected AgentNotFound, got {:?}", other),
        }
    }

    #[test]
    fn list_search_statistics_and_unregister() {
        let mut registry = AgentRegistry::new();
        registry
            .register(
                descriptor("loader", Capability::DataLoad)
                    .description("Fetches NASA climate data")
                    .business_unit("data_team")
                    .tag("nasa"),
                constant(json!(1)),
            )
            .unwrap();
        registry
            .register(
                descriptor("ranker", Capability::Ranking).business_unit("ranking_team").disabled(),
                constant(json!(1)),
            )
            .unwrap();

        let filter = AgentFilter {
            enabled_only: true,
            ..AgentFilter::default()
        };
        assert_eq!(registry.list_agents(&filter).len(), 1);
        assert_eq!(registry.list_agents(&AgentFilter::capability(Capability::Ranking)).len(), 1);

        assert_eq!(registry.search("climate").len(), 1);
        assert_eq!(registry.search("NASA")[0].id.as_str(), "loader");

        let stats = registry.statistics();
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.enabled_agents, 1);
        assert_eq!(stats.by_business_unit.get("data_team"), Some(&1));
        assert_eq!(stats.by_execution_model.get(&ExecutionModel::PlainFunction), Some(&2));

        let removed = registry.unregister(&AgentId::new("loader")).unwrap();
        assert_eq!(removed.id.as_str(), "loader");
        assert!(registry.get(&AgentId::new("ranker")).is_ok());
        assert!(registry.unregister(&AgentId::new("loader")).is_err());
    }
}
