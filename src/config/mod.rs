//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for graph runs and for
//! pipelines of shell commands.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::PipelineBuilder;
pub use error::ConfigError;
pub use types::{GraphConfig, PipelineConfig, RetryConfig, TaskConfig};
pub use yaml::{YamlLoader, load_pipeline};
