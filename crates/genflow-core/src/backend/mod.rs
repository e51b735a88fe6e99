//! Backend client boundary — the external generative service.
//!
//! The core only depends on the [`BackendClient`] trait. A handle is injected
//! into the [`FlowExecutor`](crate::flow::FlowExecutor); there is no global
//! client.
//!
//! ```text
//! FlowExecutor ──► Arc<dyn BackendClient> ──► HttpBackendClient (REST)
//!                                        └──► ScriptedBackend (tests)
//! ```

pub mod http;
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpBackendClient;
pub use mock::{Scripted, ScriptedBackend};

/// Reference to a media payload inside a prompt or a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    /// Data URI or remote URL
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl MediaRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: None,
        }
    }
}

/// One element of the ordered prompt sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptPart {
    Text {
        text: String,
    },
    Media {
        #[serde(rename = "mediaRef")]
        media_ref: MediaRef,
    },
}

impl PromptPart {
    pub fn text(text: impl Into<String>) -> Self {
        PromptPart::Text { text: text.into() }
    }

    pub fn media(url: impl Into<String>) -> Self {
        PromptPart::Media {
            media_ref: MediaRef::new(url),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PromptPart::Text { text } => Some(text),
            PromptPart::Media { .. } => None,
        }
    }
}

/// Tuning parameters forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// e.g. `["TEXT", "IMAGE"]` for image-producing models
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<String>,
}

/// Assembled request for a single backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRequest {
    /// Model identifier
    pub backend: String,
    pub parts: Vec<PromptPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<GenerationOptions>,
}

impl BackendRequest {
    /// All text parts joined with newlines.
    pub fn prompt_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(PromptPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn media_parts(&self) -> impl Iterator<Item = &MediaRef> {
        self.parts.iter().filter_map(|p| match p {
            PromptPart::Media { media_ref } => Some(media_ref),
            PromptPart::Text { .. } => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageInfo {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// What the backend produced. Both fields empty means "no usable result".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,
}

impl BackendResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn media(url: impl Into<String>) -> Self {
        Self {
            media: Some(MediaRef::new(url)),
            ..Default::default()
        }
    }

    /// Non-blank text, if any.
    pub fn usable_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.usable_text().is_none() && self.media.is_none()
    }
}

/// Failure reported by a backend client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("backend returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// Abstract generative service.
///
/// Implementations must honor `timeout`; the executor additionally bounds
/// every call with the same deadline.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn invoke(
        &self,
        request: &BackendRequest,
        timeout: Duration,
    ) -> Result<BackendResponse, BackendError>;

    /// Short identifier used in logs.
    fn name(&self) -> &str {
        "backend"
    }
}
