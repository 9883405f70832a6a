//! Builders
//!
//! Fluent builder for the engine configuration.

pub mod config;

pub use config::{engine_config, resource_triplets, validate_address, EngineConfigBuilder};
