//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses the
//! genflow-core orchestration through a shared [`Runtime`].

pub mod flows;
pub mod run;

use std::path::Path;
use std::sync::Arc;

use genflow_core::backend::{BackendClient, HttpBackendClient};
use genflow_core::{
    catalog, ConfigError, FanOutPolicy, FlowError, FlowExecutor, FlowRegistry, GenflowConfig,
};
use serde_json::{json, Value};

/// Why a command did not produce output.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// A flow or operation failed; rendered as an error envelope
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Usage(String),
}

impl CommandError {
    /// JSON printed on stdout for failures.
    pub fn to_json(&self) -> Value {
        match self {
            CommandError::Flow(e) => serde_json::to_value(e.envelope())
                .unwrap_or_else(|_| json!({ "message": e.to_string() })),
            CommandError::Config(e) => {
                json!({ "kind": "ConfigError", "message": e.to_string() })
            }
            CommandError::Usage(message) => json!({ "kind": "UsageError", "message": message }),
        }
    }
}

/// Everything a command needs to run flows.
#[derive(Clone)]
pub struct Runtime {
    pub executor: FlowExecutor,
    pub registry: FlowRegistry,
    pub policy: FanOutPolicy,
}

impl Runtime {
    /// Runtime talking to the HTTP backend described by `config`.
    pub fn from_config(
        config: &GenflowConfig,
        registry: FlowRegistry,
    ) -> Result<Self, CommandError> {
        config.validate()?;
        let client = HttpBackendClient::new(&config.backend)
            .map_err(|e| CommandError::Usage(format!("cannot create backend client: {}", e)))?;
        Ok(Self::with_backend(Arc::new(client), config, registry))
    }

    /// Runtime with an injected backend.
    pub fn with_backend(
        backend: Arc<dyn BackendClient>,
        config: &GenflowConfig,
        registry: FlowRegistry,
    ) -> Self {
        let executor =
            FlowExecutor::new(backend, config.timeout()).with_model_routes(config.model_routes());
        Self {
            executor,
            registry,
            policy: config.fan_out_policy,
        }
    }
}

/// Built-in flows plus any YAML definitions in `flows_dir`.
pub fn load_registry(flows_dir: Option<&str>) -> Result<FlowRegistry, CommandError> {
    let mut builder = catalog::builder()?;
    if let Some(dir) = flows_dir {
        builder = builder.load_dir(dir)?;
    }
    Ok(builder.build()?)
}

/// Parse `--input`: inline JSON, or `@path` to read it from a file.
pub fn parse_input(raw: &str) -> Result<Value, CommandError> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(Path::new(path))
            .map_err(|e| CommandError::Usage(format!("cannot read input file '{}': {}", path, e)))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text)
        .map_err(|e| CommandError::Usage(format!("--input is not valid JSON: {}", e)))
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
