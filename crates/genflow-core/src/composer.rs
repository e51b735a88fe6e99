//! Flow Composer — combines independent flows and fan-outs into one result.
//!
//! Sub-tasks without dependencies start together; a sub-task that depends on
//! others starts once they have all resolved and receives their outputs.
//!
//! - any `Required` failure aborts the composite with a [`CompositeError`]
//!   naming the sub-task; sub-tasks still running are dropped
//! - an `Optional` failure only marks that entry [`SubResult::Unavailable`]
//!
//! ```text
//! description (required) ──► tagline (optional)
//! specification (optional)
//! images (optional, fan-out ×3)
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Map, Value};

use crate::error::{CompositeError, ErrorKind, FlowError};
use crate::schema::{ValidationError, Violation};

/// Outputs of a sub-task's dependencies, keyed by sub-task name.
pub type TaskOutputs = BTreeMap<String, Value>;

type Produce =
    Arc<dyn Fn(TaskOutputs) -> BoxFuture<'static, Result<Value, FlowError>> + Send + Sync>;

type Running = FuturesUnordered<BoxFuture<'static, (usize, Result<Value, FlowError>)>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

/// Caller-level retry for a sub-task.
///
/// Only failures that another attempt could fix are retried: backend
/// invocation errors, empty results, and fan-outs made only of those.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait before attempt `n + 1` is `backoff * n`
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// One named part of a composite operation.
pub struct SubTask {
    name: String,
    requirement: Requirement,
    depends_on: Vec<String>,
    retry: RetryPolicy,
    produce: Produce,
}

impl SubTask {
    pub fn new<F, Fut>(name: &str, requirement: Requirement, produce: F) -> Self
    where
        F: Fn(TaskOutputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FlowError>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            requirement,
            depends_on: Vec::new(),
            retry: RetryPolicy::default(),
            produce: Arc::new(move |deps| produce(deps).boxed()),
        }
    }

    pub fn required<F, Fut>(name: &str, produce: F) -> Self
    where
        F: Fn(TaskOutputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FlowError>> + Send + 'static,
    {
        Self::new(name, Requirement::Required, produce)
    }

    pub fn optional<F, Fut>(name: &str, produce: F) -> Self
    where
        F: Fn(TaskOutputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FlowError>> + Send + 'static,
    {
        Self::new(name, Requirement::Optional, produce)
    }

    /// Start only after `deps` have resolved.
    pub fn after(mut self, deps: &[&str]) -> Self {
        self.depends_on.extend(deps.iter().map(|d| d.to_string()));
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Outcome of one sub-task inside a successful composite.
#[derive(Debug, Clone, PartialEq)]
pub enum SubResult {
    Available(Value),
    Unavailable { kind: ErrorKind, message: String },
}

/// Successful composite: every required entry available.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeResult {
    pub operation: String,
    entries: Vec<(String, SubResult)>,
}

impl CompositeResult {
    pub fn get(&self, name: &str) -> Option<&SubResult> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, result)| result)
    }

    /// The value of an available entry.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.get(name)? {
            SubResult::Available(value) => Some(value),
            SubResult::Unavailable { .. } => None,
        }
    }

    pub fn is_unavailable(&self, name: &str) -> bool {
        matches!(self.get(name), Some(SubResult::Unavailable { .. }))
    }

    /// Names of entries that failed.
    pub fn unavailable(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, r)| matches!(r, SubResult::Unavailable { .. }))
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// JSON object with each entry's value, or an explicit marker for
    /// entries that failed.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (name, result) in &self.entries {
            let value = match result {
                SubResult::Available(value) => value.clone(),
                SubResult::Unavailable { kind, message } => json!({
                    "status": "unavailable",
                    "kind": kind,
                    "message": message,
                }),
            };
            map.insert(name.clone(), value);
        }
        Value::Object(map)
    }
}

/// Builder and runner for a composite operation.
pub struct Composer {
    operation: String,
    tasks: Vec<SubTask>,
}

enum Resolved {
    Succeeded(Value),
    Failed(FlowError),
    /// Not run because `dependency` is unavailable; `error` is its failure.
    Skipped { dependency: String, error: FlowError },
}

impl Resolved {
    /// The failure a dependent of this sub-task inherits, if any.
    fn failure(&self) -> Option<&FlowError> {
        match self {
            Resolved::Succeeded(_) => None,
            Resolved::Failed(error) | Resolved::Skipped { error, .. } => Some(error),
        }
    }

    fn into_sub_result(self) -> SubResult {
        match self {
            Resolved::Succeeded(value) => SubResult::Available(value),
            Resolved::Failed(error) => SubResult::Unavailable {
                kind: error.kind(),
                message: error.to_string(),
            },
            Resolved::Skipped { dependency, error } => SubResult::Unavailable {
                kind: error.root_cause().kind(),
                message: format!("dependency '{}' unavailable: {}", dependency, error),
            },
        }
    }
}

impl Composer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            tasks: Vec::new(),
        }
    }

    pub fn task(mut self, task: SubTask) -> Self {
        self.tasks.push(task);
        self
    }

    /// Run every sub-task and aggregate the outcomes.
    pub async fn run(self) -> Result<CompositeResult, FlowError> {
        self.check_graph()?;
        tracing::info!(
            "[Composer] Running '{}' with {} sub-task(s)",
            self.operation,
            self.tasks.len()
        );

        let mut resolved: HashMap<usize, Resolved> = HashMap::new();
        let mut started: HashSet<usize> = HashSet::new();
        let mut running = Running::new();

        loop {
            self.launch_ready(&mut started, &mut resolved, &mut running)?;

            let Some((index, outcome)) = running.next().await else {
                break;
            };
            let task = &self.tasks[index];
            match outcome {
                Ok(value) => {
                    tracing::debug!(
                        "[Composer] '{}' sub-task '{}' succeeded",
                        self.operation,
                        task.name
                    );
                    resolved.insert(index, Resolved::Succeeded(value));
                }
                Err(error) if task.requirement == Requirement::Required => {
                    tracing::warn!(
                        "[Composer] '{}' required sub-task '{}' failed, cancelling {}: {}",
                        self.operation,
                        task.name,
                        running.len(),
                        error
                    );
                    return Err(self.composite_error(&task.name, error));
                }
                Err(error) => {
                    tracing::warn!(
                        "[Composer] '{}' optional sub-task '{}' unavailable: {}",
                        self.operation,
                        task.name,
                        error
                    );
                    resolved.insert(index, Resolved::Failed(error));
                }
            }
        }

        // The graph is acyclic, so every sub-task has resolved by now.
        let entries = self
            .tasks
            .iter()
            .enumerate()
            .filter_map(|(index, task)| {
                let result = resolved.remove(&index)?;
                Some((task.name.clone(), result.into_sub_result()))
            })
            .collect();

        Ok(CompositeResult {
            operation: self.operation,
            entries,
        })
    }

    /// Start every sub-task whose dependencies have resolved, repeating until
    /// nothing more can start. A sub-task whose dependency failed is resolved
    /// as failed without running.
    fn launch_ready(
        &self,
        started: &mut HashSet<usize>,
        resolved: &mut HashMap<usize, Resolved>,
        running: &mut Running,
    ) -> Result<(), FlowError> {
        loop {
            let mut progressed = false;

            for (index, task) in self.tasks.iter().enumerate() {
                if started.contains(&index) {
                    continue;
                }
                let dep_indices: Vec<usize> = task
                    .depends_on
                    .iter()
                    .filter_map(|dep| self.index_of(dep))
                    .collect();
                if !dep_indices.iter().all(|i| resolved.contains_key(i)) {
                    continue;
                }

                started.insert(index);
                progressed = true;

                let mut outputs = TaskOutputs::new();
                let mut failed_dep = None;
                for i in &dep_indices {
                    let dependency = &self.tasks[*i].name;
                    match resolved.get(i) {
                        Some(Resolved::Succeeded(value)) => {
                            outputs.insert(dependency.clone(), value.clone());
                        }
                        Some(other) => {
                            failed_dep = other.failure().map(|e| (dependency.clone(), e.clone()));
                            break;
                        }
                        None => {}
                    }
                }

                if let Some((dependency, error)) = failed_dep {
                    if task.requirement == Requirement::Required {
                        let cause = self.composite_error(&dependency, error);
                        return Err(self.composite_error(&task.name, cause));
                    }
                    tracing::warn!(
                        "[Composer] '{}' skipping '{}': dependency '{}' is unavailable",
                        self.operation,
                        task.name,
                        dependency
                    );
                    resolved.insert(index, Resolved::Skipped { dependency, error });
                    continue;
                }

                let produce = task.produce.clone();
                let retry = task.retry;
                let name = task.name.clone();
                running.push(
                    async move { (index, run_with_retry(&name, produce, outputs, retry).await) }
                        .boxed(),
                );
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.name == name)
    }

    fn composite_error(&self, task: &str, source: FlowError) -> FlowError {
        FlowError::Composite(CompositeError {
            operation: self.operation.clone(),
            task: task.to_string(),
            source: Box::new(source),
        })
    }

    /// Reject duplicate names, unknown dependencies and dependency cycles.
    fn check_graph(&self) -> Result<(), FlowError> {
        let mut violations = Vec::new();
        let mut seen = HashSet::new();

        for task in &self.tasks {
            let path = format!("tasks.{}", task.name);
            if !seen.insert(task.name.as_str()) {
                violations.push(Violation {
                    path: path.clone(),
                    reason: "duplicate sub-task name".to_string(),
                });
            }
            for dep in &task.depends_on {
                if self.index_of(dep).is_none() {
                    violations.push(Violation {
                        path: path.clone(),
                        reason: format!("depends on unknown sub-task '{}'", dep),
                    });
                }
            }
        }

        if violations.is_empty() {
            // Kahn's algorithm; whatever never reaches in-degree zero is on a cycle.
            let mut in_degree: Vec<usize> = self
                .tasks
                .iter()
                .map(|t| t.depends_on.len())
                .collect();
            let mut queue: VecDeque<usize> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d == 0)
                .map(|(i, _)| i)
                .collect();
            let mut visited = 0;
            while let Some(i) = queue.pop_front() {
                visited += 1;
                let name = &self.tasks[i].name;
                for (j, task) in self.tasks.iter().enumerate() {
                    let edges = task.depends_on.iter().filter(|d| *d == name).count();
                    if edges > 0 {
                        in_degree[j] -= edges;
                        if in_degree[j] == 0 {
                            queue.push_back(j);
                        }
                    }
                }
            }
            if visited < self.tasks.len() {
                for (i, task) in self.tasks.iter().enumerate() {
                    if in_degree[i] > 0 {
                        violations.push(Violation {
                            path: format!("tasks.{}", task.name),
                            reason: "dependency cycle".to_string(),
                        });
                    }
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(FlowError::InputValidation {
                flow: self.operation.clone(),
                source: ValidationError { violations },
            })
        }
    }
}

async fn run_with_retry(
    name: &str,
    produce: Produce,
    deps: TaskOutputs,
    retry: RetryPolicy,
) -> Result<Value, FlowError> {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match produce(deps.clone()).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts && error.is_retryable() => {
                tracing::warn!(
                    "[Composer] '{}' attempt {}/{} failed, retrying: {}",
                    name,
                    attempt,
                    max_attempts,
                    error
                );
                tokio::time::sleep(retry.backoff * attempt).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn backend_error(flow: &str) -> FlowError {
        FlowError::BackendInvocation {
            flow: flow.to_string(),
            source: BackendError::Transport("connection reset".to_string()),
        }
    }

    #[tokio::test]
    async fn test_dependent_receives_dependency_output() {
        let result = Composer::new("product-details")
            .task(SubTask::required("description", |_| async { Ok(json!("A sturdy mug")) }))
            .task(
                SubTask::optional("tagline", |deps: TaskOutputs| async move {
                    let description = deps["description"].as_str().unwrap_or_default().to_string();
                    Ok(json!(format!("{}!", description)))
                })
                .after(&["description"]),
            )
            .run()
            .await
            .unwrap();

        assert_eq!(result.value("tagline"), Some(&json!("A sturdy mug!")));
        assert!(result.unavailable().is_empty());
    }

    #[tokio::test]
    async fn test_optional_dependency_failure_skips_dependent() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_task = ran.clone();
        let result = Composer::new("product-details")
            .task(SubTask::required("description", |_| async { Ok(json!("ok")) }))
            .task(SubTask::optional("specification", |_| async {
                Err(backend_error("product-specification"))
            }))
            .task(
                SubTask::optional("summary", move |_| {
                    ran_in_task.fetch_add(1, Ordering::SeqCst);
                    async { Ok(json!("never")) }
                })
                .after(&["specification"]),
            )
            .run()
            .await
            .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(result.unavailable(), vec!["specification", "summary"]);
        match result.get("summary") {
            Some(SubResult::Unavailable { kind, message }) => {
                assert_eq!(*kind, ErrorKind::BackendInvocation);
                assert!(message.starts_with("dependency 'specification' unavailable"));
            }
            other => panic!("expected unavailable summary, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_skip_propagates_through_chain() {
        let result = Composer::new("op")
            .task(SubTask::optional("a", |_| async { Err(backend_error("a")) }))
            .task(SubTask::optional("b", |_| async { Ok(json!(1)) }).after(&["a"]))
            .task(SubTask::optional("c", |_| async { Ok(json!(2)) }).after(&["b"]))
            .run()
            .await
            .unwrap();

        assert_eq!(result.unavailable(), vec!["a", "b", "c"]);
        let value = result.to_value();
        assert_eq!(value["c"]["kind"], "BackendInvocationError");
        assert!(value["c"]["message"]
            .as_str()
            .unwrap()
            .starts_with("dependency 'b' unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_required_failure_cancels_running_siblings() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let start = tokio::time::Instant::now();

        let err = Composer::new("op")
            .task(SubTask::optional("slow", move |_| {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(json!("late"))
                }
            }))
            .task(SubTask::required("fast", |_| async { Err(backend_error("fast")) }))
            .run()
            .await
            .unwrap_err();

        assert_eq!(start.elapsed(), Duration::ZERO);
        match err {
            FlowError::Composite(c) => assert_eq!(c.task, "fast"),
            other => panic!("expected composite error, got {:?}", other),
        }

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_required_dependent_of_failed_optional_aborts() {
        let err = Composer::new("op")
            .task(SubTask::optional("a", |_| async { Err(backend_error("a")) }))
            .task(SubTask::required("b", |_| async { Ok(json!(1)) }).after(&["a"]))
            .run()
            .await
            .unwrap_err();

        match err {
            FlowError::Composite(c) => {
                assert_eq!(c.task, "b");
                assert_eq!(c.source.kind(), ErrorKind::Composite);
                assert_eq!(err_root_kind(&c.source), ErrorKind::BackendInvocation);
            }
            other => panic!("expected composite error, got {:?}", other),
        }
    }

    fn err_root_kind(error: &FlowError) -> ErrorKind {
        error.root_cause().kind()
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let result = Composer::new("op")
            .task(
                SubTask::required("flaky", move |_| {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(backend_error("flaky"))
                        } else {
                            Ok(json!("third time lucky"))
                        }
                    }
                })
                .retry(RetryPolicy::attempts(3, Duration::ZERO)),
            )
            .run()
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(result.value("flaky"), Some(&json!("third time lucky")));
    }

    #[tokio::test]
    async fn test_input_errors_are_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let err = Composer::new("op")
            .task(
                SubTask::required("strict", move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(FlowError::invalid_input("strict", "x", "bad")) }
                })
                .retry(RetryPolicy::attempts(5, Duration::ZERO)),
            )
            .run()
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), ErrorKind::Composite);
    }

    #[tokio::test]
    async fn test_graph_errors_rejected_before_launch() {
        let err = Composer::new("op")
            .task(SubTask::required("a", |_| async { Ok(json!(1)) }).after(&["b"]))
            .task(SubTask::required("b", |_| async { Ok(json!(2)) }).after(&["a"]))
            .task(SubTask::optional("c", |_| async { Ok(json!(3)) }).after(&["missing"]))
            .run()
            .await
            .unwrap_err();

        match err {
            FlowError::InputValidation { source, .. } => {
                assert_eq!(
                    source.reason_for("tasks.c"),
                    Some("depends on unknown sub-task 'missing'")
                );
            }
            other => panic!("expected input validation error, got {:?}", other),
        }

        let err = Composer::new("op")
            .task(SubTask::required("a", |_| async { Ok(json!(1)) }).after(&["b"]))
            .task(SubTask::required("b", |_| async { Ok(json!(2)) }).after(&["a"]))
            .run()
            .await
            .unwrap_err();
        match err {
            FlowError::InputValidation { source, .. } => {
                assert_eq!(source.reason_for("tasks.a"), Some("dependency cycle"));
                assert_eq!(source.reason_for("tasks.b"), Some("dependency cycle"));
            }
            other => panic!("expected input validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_to_value_marks_unavailable() {
        let result = CompositeResult {
            operation: "op".to_string(),
            entries: vec![
                ("description".to_string(), SubResult::Available(json!("text"))),
                (
                    "images".to_string(),
                    SubResult::Unavailable {
                        kind: ErrorKind::Aggregate,
                        message: "fan-out failed".to_string(),
                    },
                ),
            ],
        };
        let value = result.to_value();
        assert_eq!(value["description"], "text");
        assert_eq!(value["images"]["status"], "unavailable");
        assert_eq!(value["images"]["kind"], "AggregateError");
        assert!(value.get("tagline").is_none());
    }
}
