//! Flow registry — the read-only set of flow definitions.
//!
//! A registry is assembled once through [`FlowRegistryBuilder`] and never
//! mutated afterwards, so it can be shared across concurrent invocations
//! without locking.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::ConfigError;
use crate::flow::FlowDefinition;

/// Immutable name → definition map.
#[derive(Debug, Clone, Default)]
pub struct FlowRegistry {
    flows: BTreeMap<String, Arc<FlowDefinition>>,
}

/// Collects definitions before freezing them into a [`FlowRegistry`].
#[derive(Debug, Default)]
pub struct FlowRegistryBuilder {
    flows: Vec<FlowDefinition>,
}

impl FlowRegistry {
    pub fn builder() -> FlowRegistryBuilder {
        FlowRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<FlowDefinition>> {
        self.flows.get(name).cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.flows.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FlowDefinition>> {
        self.flows.values()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

impl FlowRegistryBuilder {
    pub fn register(mut self, flow: FlowDefinition) -> Self {
        self.flows.push(flow);
        self
    }

    /// Add every `*.yaml` / `*.yml` flow definition in a directory.
    pub fn load_dir(mut self, dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        for path in paths {
            let flow = FlowDefinition::from_file(&path)?;
            tracing::debug!("[FlowRegistry] Loaded '{}' from {}", flow.name, path.display());
            self.flows.push(flow);
        }
        Ok(self)
    }

    /// Check every definition and freeze the registry.
    pub fn build(self) -> Result<FlowRegistry, ConfigError> {
        let mut flows = BTreeMap::new();
        for flow in self.flows {
            flow.check()?;
            let name = flow.name.clone();
            if flows.insert(name.clone(), Arc::new(flow)).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "flow '{}' is registered more than once",
                    name
                )));
            }
        }
        tracing::info!("[FlowRegistry] Registered {} flow(s)", flows.len());
        Ok(FlowRegistry { flows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::OutputSpec;
    use crate::prompt::Template;
    use crate::schema::{FieldSpec, Shape};

    fn echo_flow(name: &str) -> FlowDefinition {
        FlowDefinition::new(
            name,
            "test-model",
            Shape::new().field(FieldSpec::string("topic").required()),
            OutputSpec::text("text"),
            Template::parse("Write about {{topic}}").unwrap(),
        )
    }

    #[test]
    fn test_build_and_lookup() {
        let registry = FlowRegistry::builder()
            .register(echo_flow("b"))
            .register(echo_flow("a"))
            .build()
            .unwrap();
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().name, "a");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = FlowRegistry::builder()
            .register(echo_flow("a"))
            .register(echo_flow("a"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("registered more than once"));
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("haiku.yaml"),
            r#"
name: haiku
model: test-model
input:
  - name: topic
    type: string
    required: true
output:
  kind: text
  field: poem
template: "Write a haiku about {{topic}}"
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = FlowRegistry::builder()
            .register(echo_flow("essay"))
            .load_dir(dir.path())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(registry.names(), vec!["essay", "haiku"]);
    }
}
