//! genflow CLI library — command implementations shared by the binary and
//! the integration tests.

pub mod commands;

pub use commands::{load_registry, parse_input, CommandError, Runtime};
