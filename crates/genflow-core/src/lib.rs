//! Genflow Core — orchestration of generative-backend "flows".
//!
//! A flow is a named operation with a declared input shape, an output shape
//! and a prompt template. This crate validates inputs, assembles backend
//! requests, checks what comes back, and combines flows into fixed-size
//! fan-outs and composite operations. It has **no HTTP framework
//! dependency** by default, making it suitable for use in:
//!
//! - CLI tools (via `genflow-cli`)
//! - HTTP route handlers
//! - tests, with [`backend::ScriptedBackend`] standing in for the service
//!
//! # Feature Flags
//!
//! - `axum` — Enables `IntoResponse` impl on `FlowError` for use in axum handlers.

pub mod backend;
pub mod catalog;
pub mod composer;
pub mod config;
pub mod error;
pub mod fanout;
pub mod flow;
pub mod media;
pub mod prompt;
pub mod schema;

// Convenience re-exports
pub use backend::{BackendClient, BackendError, BackendRequest, BackendResponse};
pub use composer::{Composer, CompositeResult, Requirement, RetryPolicy, SubResult, SubTask};
pub use config::{ConfigError, GenflowConfig};
pub use error::{ErrorEnvelope, ErrorKind, FlowError};
pub use fanout::{fan_out, FanOutJob, FanOutPolicy};
pub use flow::{FlowDefinition, FlowExecutor, FlowRegistry, OutputSpec};
pub use media::MediaAsset;
pub use prompt::Template;
pub use schema::{validate, Shape, ValidationError};
