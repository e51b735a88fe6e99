//! `genflow validate | run | logos | product-details`

use genflow_core::{catalog, schema, FlowError, FlowRegistry};
use serde_json::{json, Value};

use super::{CommandError, Runtime};

/// Check `input` against a flow's input shape without calling the backend.
pub fn validate(
    registry: &FlowRegistry,
    flow_name: &str,
    input: &Value,
) -> Result<Value, CommandError> {
    let flow = registry.get(flow_name).ok_or_else(|| {
        FlowError::invalid_input(flow_name, "flow", format!("unknown flow '{}'", flow_name))
    })?;
    schema::validate(&flow.input, input).map_err(|source| FlowError::InputValidation {
        flow: flow.name.clone(),
        source,
    })?;
    Ok(json!({ "flow": flow.name, "valid": true }))
}

/// Single execution of a registered flow.
pub async fn run(runtime: &Runtime, flow_name: &str, input: Value) -> Result<Value, CommandError> {
    tracing::info!("[genflow] Running flow '{}'", flow_name);
    Ok(runtime.executor.run_named(&runtime.registry, flow_name, input).await?)
}

/// Three logo variants for one concept.
pub async fn logos(runtime: &Runtime, input: Value) -> Result<Value, CommandError> {
    Ok(catalog::generate_logo_set(&runtime.executor, input, runtime.policy).await?)
}

/// Composite product details.
pub async fn product_details(runtime: &Runtime, input: Value) -> Result<Value, CommandError> {
    Ok(catalog::generate_product_details(&runtime.executor, input, runtime.policy).await?)
}
