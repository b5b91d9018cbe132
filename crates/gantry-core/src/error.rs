//! Error types for Gantry

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using GantryError
pub type Result<T> = std::result::Result<T, GantryError>;

/// Main error type for Gantry core operations
#[derive(Debug, Error)]
pub enum GantryError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Project graph errors
    #[error(transparent)]
    ProjectGraph(#[from] ProjectGraphError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Project graph errors
#[derive(Debug, Error)]
pub enum ProjectGraphError {
    /// A dependency edge points at a project that does not exist
    #[error("Project '{source_project}' depends on unknown project '{target}'")]
    UnknownProject {
        source_project: String,
        target: String,
    },

    /// Two projects share a name
    #[error("Duplicate project name: {0}")]
    DuplicateProject(String),

    /// Circular project dependencies
    #[error("Circular project dependency: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

impl GantryError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_message() {
        let err = ProjectGraphError::Cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Circular project dependency: a -> b -> a");
    }

    #[test]
    fn test_config_error_wraps_transparently() {
        let err: GantryError = ConfigError::InvalidValue {
            field: "tasks.parallel".to_string(),
            message: "must be at least 1".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: tasks.parallel - must be at least 1"
        );
    }
}
