//! Raw units of work, before adaptation.

use std::{collections::BTreeMap, future::Future, sync::Arc};

use futures::future::BoxFuture;
use serde_json::Value;

use conclave_contracts::{agent::ExecutionModel, error::AgentError, view::StateView};

use crate::traits::{NestedWorkflow, ToolRunnable};

/// Boxed async function body of a plain-function agent.
pub type AgentFn = Arc<dyn Fn(StateView) -> BoxFuture<'static, Result<Value, AgentError>> + Send + Sync>;

/// A tool-augmented chain and the single field it reads and writes.
#[derive(Clone)]
pub struct ToolChain {
    pub runnable: Arc<dyn ToolRunnable>,
    pub input_key: String,
    pub output_key: String,
    /// Tool names the chain may call, passed through in its input.
    pub tools: Vec<String>,
}

/// A nested workflow with explicit field mappings.
#[derive(Clone)]
pub struct SubWorkflowUnit {
    pub workflow: Arc<dyn NestedWorkflow>,
    /// Outer state field -> nested input field.
    pub input_mapping: BTreeMap<String, String>,
    /// Nested output field -> outer state field.
    pub output_mapping: BTreeMap<String, String>,
}

/// A unit of work as supplied at registration time.
#[derive(Clone)]
pub enum RawAgentUnit {
    Function(AgentFn),
    ToolAugmented(ToolChain),
    SubWorkflow(SubWorkflowUnit),
}

impl RawAgentUnit {
    /// Wrap an async closure over a state view.
    pub fn function<F, Fut>(f: F) -> Self
    where
        F: Fn(StateView) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AgentError>> + Send + 'static,
    {
        Self::Function(Arc::new(move |view| Box::pin(f(view))))
    }

    /// Wrap a synchronous closure. Runs on the async task that invokes it.
    pub fn sync_fn<F>(f: F) -> Self
    where
        F: Fn(&StateView) -> Result<Value, AgentError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::Function(Arc::new(move |view| {
            let f = Arc::clone(&f);
            Box::pin(async move { f(&view) })
        }))
    }

    pub fn tool_chain(
        runnable: Arc<dyn ToolRunnable>,
        input_key: impl Into<String>,
        output_key: impl Into<String>,
        tools: Vec<String>,
    ) -> Self {
        Self::ToolAugmented(ToolChain {
            runnable,
            input_key: input_key.into(),
            output_key: output_key.into(),
            tools,
        })
    }

    pub fn sub_workflow(
        workflow: Arc<dyn NestedWorkflow>,
        input_mapping: BTreeMap<String, String>,
        output_mapping: BTreeMap<String, String>,
    ) -> Self {
        Self::SubWorkflow(SubWorkflowUnit {
            workflow,
            input_mapping,
            output_mapping,
        })
    }

    /// The execution model this unit needs an adapter for.
    pub fn model(&self) -> ExecutionModel {
        match self {
            RawAgentUnit::Function(_) => ExecutionModel::PlainFunction,
            RawAgentUnit::ToolAugmented(_) => ExecutionModel::ToolAugmented,
            RawAgentUnit::SubWorkflow(_) => ExecutionModel::SubWorkflow,
        }
    }
}
