//! Fan-Out Coordinator — N concurrent invocations of one flow, all or nothing.
//!
//! Every member gets its own input derived from a shared base input (for
//! example a `variation` number). The job either yields exactly N values,
//! with `values[i]` produced from request `i`, or a single
//! [`AggregateError`] listing every failed index.

use std::str::FromStr;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AggregateError, FlowError, MemberFailure};
use crate::flow::{FlowDefinition, FlowExecutor};

/// What to do with in-flight members once one has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FanOutPolicy {
    /// Let every member finish, then report all failures
    #[default]
    WaitAll,
    /// Abort the remaining members on the first failure
    FailFast,
}

impl FromStr for FanOutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "wait-all" => Ok(FanOutPolicy::WaitAll),
            "fail-fast" => Ok(FanOutPolicy::FailFast),
            other => Err(format!(
                "unknown fan-out policy '{}' (expected 'wait-all' or 'fail-fast')",
                other
            )),
        }
    }
}

/// A fixed-cardinality batch of invocations of one flow.
#[derive(Debug, Clone)]
pub struct FanOutJob {
    pub flow: Arc<FlowDefinition>,
    pub base_input: Value,
    pub count: usize,
    pub policy: FanOutPolicy,
}

impl FanOutJob {
    pub fn new(flow: Arc<FlowDefinition>, base_input: Value, count: usize) -> Self {
        Self {
            flow,
            base_input,
            count,
            policy: FanOutPolicy::default(),
        }
    }

    pub fn policy(mut self, policy: FanOutPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run all members. `build_input(base, index)` derives each member's input.
    pub async fn run<F>(
        &self,
        executor: &FlowExecutor,
        build_input: F,
    ) -> Result<Vec<Value>, FlowError>
    where
        F: Fn(&Value, usize) -> Value,
    {
        let flow = &self.flow;
        if self.count == 0 {
            return Err(FlowError::invalid_input(
                &flow.name,
                "count",
                "fan-out count must be at least 1",
            ));
        }

        tracing::info!(
            "[FanOut] Launching {} invocation(s) of '{}' ({:?})",
            self.count,
            flow.name,
            self.policy
        );

        let mut pending: FuturesUnordered<_> = (0..self.count)
            .map(|index| {
                let input = build_input(&self.base_input, index);
                async move { (index, executor.run(flow, input).await) }
            })
            .collect();

        let mut slots: Vec<Option<Value>> = vec![None; self.count];
        let mut failures: Vec<MemberFailure> = Vec::new();

        while let Some((index, outcome)) = pending.next().await {
            match outcome {
                Ok(value) => slots[index] = Some(value),
                Err(error) => {
                    tracing::warn!("[FanOut] '{}' member {} failed: {}", flow.name, index, error);
                    failures.push(MemberFailure { index, error });
                    if self.policy == FanOutPolicy::FailFast {
                        break;
                    }
                }
            }
        }
        // Dropping the remaining futures cancels members still in flight.
        drop(pending);

        if !failures.is_empty() {
            failures.sort_by_key(|f| f.index);
            let cancelled: Vec<usize> = (0..self.count)
                .filter(|i| slots[*i].is_none() && !failures.iter().any(|f| f.index == *i))
                .collect();
            tracing::warn!(
                "[FanOut] '{}' failed: {} failure(s), {} cancelled",
                flow.name,
                failures.len(),
                cancelled.len()
            );
            return Err(AggregateError {
                flow: flow.name.clone(),
                required: self.count,
                failures,
                cancelled,
            }
            .into());
        }

        let values: Vec<Value> = slots.into_iter().flatten().collect();
        debug_assert_eq!(values.len(), self.count);
        tracing::info!("[FanOut] '{}' produced {} result(s)", flow.name, values.len());
        Ok(values)
    }
}

/// Run `count` invocations of `flow` and require all of them to succeed.
pub async fn fan_out<F>(
    executor: &FlowExecutor,
    flow: Arc<FlowDefinition>,
    base_input: Value,
    count: usize,
    policy: FanOutPolicy,
    build_input: F,
) -> Result<Vec<Value>, FlowError>
where
    F: Fn(&Value, usize) -> Value,
{
    FanOutJob::new(flow, base_input, count)
        .policy(policy)
        .run(executor, build_input)
        .await
}

/// Input builder that sets `field` to the 1-based member number.
pub fn numbered(field: &'static str) -> impl Fn(&Value, usize) -> Value {
    move |base, index| {
        let mut input = base.clone();
        if let Some(map) = input.as_object_mut() {
            map.insert(field.to_string(), Value::from(index + 1));
        }
        input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Scripted, ScriptedBackend};
    use crate::error::ErrorKind;
    use crate::flow::OutputSpec;
    use crate::prompt::Template;
    use crate::schema::{FieldSpec, Shape};
    use serde_json::json;
    use std::time::Duration;

    fn variant_flow() -> Arc<FlowDefinition> {
        Arc::new(FlowDefinition::new(
            "variant",
            "test-model",
            Shape::new()
                .field(FieldSpec::string("topic").required())
                .field(FieldSpec::integer("variation")),
            OutputSpec::text("text"),
            Template::parse("{{topic}} #{{variation}}").unwrap(),
        ))
    }

    #[test]
    fn test_numbered_builder() {
        let build = numbered("variation");
        assert_eq!(
            build(&json!({ "topic": "x" }), 2),
            json!({ "topic": "x", "variation": 3 })
        );
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("fail-fast".parse::<FanOutPolicy>(), Ok(FanOutPolicy::FailFast));
        assert!("sometimes".parse::<FanOutPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_zero_count_rejected() {
        let backend = Arc::new(ScriptedBackend::always(Scripted::text("x")));
        let exec = FlowExecutor::new(backend, Duration::from_secs(1));
        let err = fan_out(
            &exec,
            variant_flow(),
            json!({ "topic": "x" }),
            0,
            FanOutPolicy::WaitAll,
            numbered("variation"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputValidation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_cancels_slow_members() {
        let backend = Arc::new(ScriptedBackend::from_fn(|_, request| {
            if request.prompt_text().ends_with("#1") {
                Scripted::transport("connection refused")
            } else {
                Scripted::text("slow").after(Duration::from_secs(10))
            }
        }));
        let exec = FlowExecutor::new(backend, Duration::from_secs(60));

        let err = fan_out(
            &exec,
            variant_flow(),
            json!({ "topic": "x" }),
            3,
            FanOutPolicy::FailFast,
            numbered("variation"),
        )
        .await
        .unwrap_err();

        match err {
            FlowError::Aggregate(agg) => {
                assert_eq!(agg.failed_indices(), vec![0]);
                assert_eq!(agg.cancelled, vec![1, 2]);
            }
            other => panic!("expected aggregate error, got {:?}", other),
        }
    }
}
