//! YAML configuration parsing.

use std::path::Path;

use super::error::ConfigError;
use super::types::{GraphConfig, PipelineConfig};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load graph settings from a file.
    pub fn load_graph_config(path: impl AsRef<Path>) -> Result<GraphConfig, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        let config: GraphConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse graph settings from a YAML string.
    pub fn parse_graph_config(yaml: &str) -> Result<GraphConfig, ConfigError> {
        let config: GraphConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a pipeline from a file.
    pub fn load_pipeline(path: impl AsRef<Path>) -> Result<PipelineConfig, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        let config: PipelineConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a pipeline from a YAML string.
    pub fn parse_pipeline(yaml: &str) -> Result<PipelineConfig, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }
}

/// Load and validate a pipeline file.
pub fn load_pipeline(path: impl AsRef<Path>) -> Result<PipelineConfig, ConfigError> {
    YamlLoader::load_pipeline(path)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })
}
