//! Flows — definitions, the registry that owns them, and the executor.
//!
//! # Architecture
//!
//! ```text
//! FlowDefinition (Rust or YAML) ──► FlowRegistry (read-only)
//!                                        │
//!          caller input ──────────► FlowExecutor ──► BackendClient
//!                                        │
//!                               validated output value
//! ```

pub mod definition;
pub mod executor;
pub mod registry;

pub use definition::{FlowDefinition, OutputSpec};
pub use executor::{FlowExecutor, InvocationStage};
pub use registry::{FlowRegistry, FlowRegistryBuilder};
