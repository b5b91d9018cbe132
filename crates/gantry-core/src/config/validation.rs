//! Configuration validation

use std::collections::HashSet;

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::{Config, Parallelism};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_tasks(config)?;
    validate_projects(config)?;
    validate_remote_cache(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_tasks(config: &Config) -> Result<()> {
    if config.tasks.parallel == Parallelism::Count(0) {
        return Err(ConfigError::InvalidValue {
            field: "tasks.parallel".to_string(),
            message: "must be at least 1 (use `false` to run serially)".to_string(),
        }
        .into());
    }

    if config.tasks.cache_directory.as_os_str().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "tasks.cache_directory".to_string(),
            message: "cache directory cannot be empty".to_string(),
        }
        .into());
    }

    Ok(())
}

fn validate_projects(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();

    for (index, project) in config.projects.iter().enumerate() {
        if project.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("projects[{}].name", index),
                message: "project name cannot be empty".to_string(),
            }
            .into());
        }

        if project.name.contains(':') {
            return Err(ConfigError::InvalidValue {
                field: format!("projects[{}].name", index),
                message: format!("project name '{}' cannot contain ':'", project.name),
            }
            .into());
        }

        if !seen.insert(project.name.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: format!("projects[{}].name", index),
                message: format!("duplicate project name '{}'", project.name),
            }
            .into());
        }

        for (target_name, target) in &project.targets {
            if target.executor.as_deref() == Some("") {
                return Err(ConfigError::InvalidValue {
                    field: format!("projects.{}.targets.{}.executor", project.name, target_name),
                    message: "executor name cannot be empty".to_string(),
                }
                .into());
            }
        }
    }

    Ok(())
}

fn validate_remote_cache(config: &Config) -> Result<()> {
    if let Some(remote) = &config.remote_cache {
        if remote.directory.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "remote_cache.directory".to_string(),
                message: "directory cannot be empty".to_string(),
            }
            .into());
        }
    }
    Ok(())
}
