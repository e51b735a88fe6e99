//! Flow Executor — runs one flow invocation end to end.
//!
//! ```text
//! Received ─► InputValidated ─► RequestAssembled ─► BackendInvoked ─► OutputValidated ─► Completed
//!    │              │                                    │                 │
//!    └──────────────┴─────────────► Failed ◄─────────────┴─────────────────┘
//! ```
//!
//! The executor holds no per-invocation state; clones share the same
//! backend handle and can run concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::backend::{BackendClient, BackendError, BackendResponse};
use crate::error::FlowError;
use crate::flow::{FlowDefinition, FlowRegistry, OutputSpec};
use crate::prompt;
use crate::schema::{self, ValidationError};

/// Stages of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStage {
    Received,
    InputValidated,
    RequestAssembled,
    BackendInvoked,
    OutputValidated,
    Completed,
    Failed,
}

/// Runs flows against an injected backend.
#[derive(Clone)]
pub struct FlowExecutor {
    backend: Arc<dyn BackendClient>,
    timeout: Duration,
    model_routes: Arc<HashMap<String, String>>,
}

impl FlowExecutor {
    pub fn new(backend: Arc<dyn BackendClient>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            model_routes: Arc::new(HashMap::new()),
        }
    }

    /// Send flows declared for model `from` to model `to` instead.
    pub fn with_model_routes(mut self, routes: HashMap<String, String>) -> Self {
        self.model_routes = Arc::new(routes);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `flow` on `input`, returning the validated output value.
    pub async fn run(&self, flow: &FlowDefinition, input: Value) -> Result<Value, FlowError> {
        self.run_traced(flow, input).await.0
    }

    /// Run and also return the stages the invocation went through.
    pub async fn run_traced(
        &self,
        flow: &FlowDefinition,
        input: Value,
    ) -> (Result<Value, FlowError>, Vec<InvocationStage>) {
        let mut trace = vec![InvocationStage::Received];
        let result = self.drive(flow, input, &mut trace).await;
        if let Err(ref e) = result {
            tracing::warn!(
                "[FlowExecutor] '{}' failed after {:?}: {}",
                flow.name,
                trace.last().copied().unwrap_or(InvocationStage::Received),
                e
            );
            trace.push(InvocationStage::Failed);
        }
        (result, trace)
    }

    /// Look `name` up in `registry` and run it.
    pub async fn run_named(
        &self,
        registry: &FlowRegistry,
        name: &str,
        input: Value,
    ) -> Result<Value, FlowError> {
        let flow = registry
            .get(name)
            .ok_or_else(|| {
                FlowError::invalid_input(name, "flow", format!("unknown flow '{}'", name))
            })?;
        self.run(&flow, input).await
    }

    /// Typed wrapper: serialize `input`, run, deserialize the output.
    pub async fn run_typed<I, O>(&self, flow: &FlowDefinition, input: &I) -> Result<O, FlowError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let value = serde_json::to_value(input)
            .map_err(|e| FlowError::invalid_input(&flow.name, "$", e.to_string()))?;
        let output = self.run(flow, value).await?;
        serde_json::from_value(output).map_err(|e| FlowError::OutputShape {
            flow: flow.name.clone(),
            source: ValidationError::single("$", e.to_string()),
        })
    }

    async fn drive(
        &self,
        flow: &FlowDefinition,
        input: Value,
        trace: &mut Vec<InvocationStage>,
    ) -> Result<Value, FlowError> {
        let input = schema::validate(&flow.input, &input).map_err(|source| {
            FlowError::InputValidation {
                flow: flow.name.clone(),
                source,
            }
        })?;
        advance(flow, trace, InvocationStage::InputValidated);

        let model = self
            .model_routes
            .get(&flow.model)
            .map(String::as_str)
            .unwrap_or(&flow.model);
        let request = prompt::assemble(&flow.template, &input, model, flow.options.as_ref());
        advance(flow, trace, InvocationStage::RequestAssembled);

        tracing::info!(
            "[FlowExecutor] Invoking {} backend for '{}' (model: {})",
            self.backend.name(),
            flow.name,
            model
        );
        let invocation = self.backend.invoke(&request, self.timeout);
        let response = match tokio::time::timeout(self.timeout, invocation).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.timeout)),
        }
        .map_err(|source| FlowError::BackendInvocation {
            flow: flow.name.clone(),
            source,
        })?;
        advance(flow, trace, InvocationStage::BackendInvoked);

        if let Some(ref usage) = response.usage {
            tracing::debug!(
                "[FlowExecutor] '{}' tokens: {:?} in / {:?} out",
                flow.name,
                usage.input_tokens,
                usage.output_tokens
            );
        }

        let candidate = shape_response(flow, &response)?;
        let output = schema::validate(&flow.output.shape(), &candidate).map_err(|source| {
            FlowError::OutputShape {
                flow: flow.name.clone(),
                source,
            }
        })?;
        advance(flow, trace, InvocationStage::OutputValidated);

        advance(flow, trace, InvocationStage::Completed);
        Ok(output)
    }
}

fn advance(flow: &FlowDefinition, trace: &mut Vec<InvocationStage>, next: InvocationStage) {
    tracing::debug!("[FlowExecutor] '{}' → {:?}", flow.name, next);
    trace.push(next);
}

/// Turn a raw backend response into a candidate output value.
fn shape_response(flow: &FlowDefinition, response: &BackendResponse) -> Result<Value, FlowError> {
    let empty = || FlowError::EmptyResult {
        flow: flow.name.clone(),
    };
    if response.is_empty() {
        return Err(empty());
    }

    match &flow.output {
        OutputSpec::Text { field, .. } => {
            let text = response.usable_text().ok_or_else(empty)?;
            Ok(json!({ field.as_str(): text }))
        }
        OutputSpec::Json { .. } => {
            let text = response.usable_text().ok_or_else(empty)?;
            serde_json::from_str(strip_code_fence(text)).map_err(|e| FlowError::OutputShape {
                flow: flow.name.clone(),
                source: ValidationError::single("$", format!("response is not valid JSON: {}", e)),
            })
        }
        OutputSpec::Media { field, .. } => {
            let media = response.media.as_ref().ok_or_else(empty)?;
            Ok(json!({ field.as_str(): media.url }))
        }
    }
}

/// Models often wrap JSON in a ```json fence.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
