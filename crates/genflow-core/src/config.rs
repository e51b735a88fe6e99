//! Runtime configuration — backend endpoint, models, timeouts.
//!
//! Loaded from environment variables or a YAML file:
//!
//! ```yaml
//! backend:
//!   base_url: "https://generativelanguage.googleapis.com"
//!   api_key: "${GEMINI_API_KEY}"
//! timeout_secs: 120
//! text_model: "gemini-2.0-flash"
//! image_model: "${IMAGE_MODEL:-gemini-2.0-flash-preview-image-generation}"
//! fan_out_policy: wait-all
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::catalog;
use crate::fanout::FanOutPolicy;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

static ENV_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env reference pattern compiles"));

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Connection settings for the generative backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key (supports `${ENV_VAR}` references)
    #[serde(default)]
    pub api_key: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_text_model() -> String {
    catalog::TEXT_MODEL.to_string()
}

fn default_image_model() -> String {
    catalog::IMAGE_MODEL.to_string()
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenflowConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    /// Per backend call timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_text_model")]
    pub text_model: String,

    #[serde(default = "default_image_model")]
    pub image_model: String,

    #[serde(default)]
    pub fan_out_policy: FanOutPolicy,
}

impl Default for GenflowConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            timeout_secs: default_timeout_secs(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            fan_out_policy: FanOutPolicy::default(),
        }
    }
}

impl GenflowConfig {
    /// Read configuration from `GENFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("GENFLOW_BASE_URL") {
            config.backend.base_url = url;
        }
        config.backend.api_key = std::env::var("GENFLOW_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .unwrap_or_default();

        if let Ok(model) = std::env::var("GENFLOW_TEXT_MODEL") {
            config.text_model = model;
        }
        if let Ok(model) = std::env::var("GENFLOW_IMAGE_MODEL") {
            config.image_model = model;
        }
        if let Ok(secs) = std::env::var("GENFLOW_TIMEOUT_SECS") {
            config.timeout_secs = secs.trim().parse().map_err(|e| ConfigError::Parse {
                what: "GENFLOW_TIMEOUT_SECS".to_string(),
                message: format!("{}", e),
            })?;
        }
        if let Ok(policy) = std::env::var("GENFLOW_FAN_OUT_POLICY") {
            config.fan_out_policy = policy.parse().map_err(|message| ConfigError::Parse {
                what: "GENFLOW_FAN_OUT_POLICY".to_string(),
                message,
            })?;
        }

        Ok(config)
    }

    /// Parse a YAML configuration, expanding `${VAR}` references.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            what: "configuration YAML".to_string(),
            message: e.to_string(),
        })?;
        config.backend.base_url = resolve_env_vars(&config.backend.base_url);
        config.backend.api_key = resolve_env_vars(&config.backend.api_key);
        config.text_model = resolve_env_vars(&config.text_model);
        config.image_model = resolve_env_vars(&config.image_model);
        Ok(config)
    }

    /// Load a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Check the settings needed to reach a real backend.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.api_key.trim().is_empty() || self.backend.api_key.contains("${") {
            return Err(ConfigError::Invalid(
                "no API key found. Set GENFLOW_API_KEY (or GEMINI_API_KEY), \
                 or specify backend.api_key in the config file."
                    .to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Map the catalog's default models onto the configured ones.
    pub fn model_routes(&self) -> HashMap<String, String> {
        let mut routes = HashMap::new();
        if self.text_model != catalog::TEXT_MODEL {
            routes.insert(catalog::TEXT_MODEL.to_string(), self.text_model.clone());
        }
        if self.image_model != catalog::IMAGE_MODEL {
            routes.insert(catalog::IMAGE_MODEL.to_string(), self.image_model.clone());
        }
        routes
    }
}

/// Resolve environment variable references in a string.
/// Supports `${ENV_VAR}` and `${ENV_VAR:-default}` syntax.
pub fn resolve_env_vars(input: &str) -> String {
    ENV_REF_RE
        .replace_all(input, |caps: &regex::Captures| {
            let var_expr = &caps[1];
            if let Some((var_name, default_val)) = var_expr.split_once(":-") {
                std::env::var(var_name).unwrap_or_else(|_| default_val.to_string())
            } else {
                std::env::var(var_expr).unwrap_or_else(|_| format!("${{{}}}", var_expr))
            }
        })
        .to_string()
}
