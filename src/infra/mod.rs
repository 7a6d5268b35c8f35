//! Infrastructure adapters and runtime bootstrap.

pub mod artifacts;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod http;
pub mod telemetry;
pub mod templates;
