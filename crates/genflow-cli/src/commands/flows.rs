//! `genflow flows` — inspect registered flows.

use genflow_core::FlowRegistry;
use serde_json::{json, Value};

use super::CommandError;

/// Table of registered flows.
pub fn list(registry: &FlowRegistry) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:<24} {:<44} {}\n", "NAME", "MODEL", "DESCRIPTION"));
    for flow in registry.iter() {
        out.push_str(&format!(
            "{:<24} {:<44} {}\n",
            flow.name,
            flow.model,
            flow.description.as_deref().unwrap_or("-")
        ));
    }
    out.push_str(&format!("\n{} flow(s)\n", registry.len()));
    out
}

/// Input/output shapes and template of one flow.
pub fn show(registry: &FlowRegistry, name: &str) -> Result<Value, CommandError> {
    let flow = registry.get(name).ok_or_else(|| {
        CommandError::Usage(format!("unknown flow '{}'. Run `genflow flows list`.", name))
    })?;

    Ok(json!({
        "name": flow.name,
        "description": flow.description,
        "model": flow.model,
        "options": flow.options,
        "input": flow.input,
        "output": flow.output,
        "outputShape": flow.output.shape(),
        "template": flow.template.to_source(),
    }))
}
