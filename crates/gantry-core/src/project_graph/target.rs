//! Target configuration as declared on projects and in target defaults

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::inputs::InputDefinition;

/// Executor used when a target does not name one
pub const DEFAULT_EXECUTOR: &str = "run-commands";

/// A `depends_on` entry on a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetDependency {
    /// `build` (same project), `^build` (dependency projects) or `app:build`
    Name(String),
    /// Object form
    Detailed {
        target: String,
        /// Explicit projects whose target must run first
        #[serde(default)]
        projects: Vec<String>,
        /// Whether the target runs first in every dependency project
        #[serde(default)]
        dependencies: bool,
    },
}

/// Where a target dependency points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyScope {
    /// Another target of the same project
    SameProject(String),
    /// The same-named target of every dependency project
    DependencyProjects(String),
    /// A target of explicitly named projects
    Projects { projects: Vec<String>, target: String },
}

impl TargetDependency {
    /// Resolve the entry into a scope
    pub fn scope(&self) -> DependencyScope {
        match self {
            Self::Name(name) => {
                if let Some(target) = name.strip_prefix('^') {
                    DependencyScope::DependencyProjects(target.to_string())
                } else if let Some((project, target)) = name.split_once(':') {
                    DependencyScope::Projects {
                        projects: vec![project.to_string()],
                        target: target.to_string(),
                    }
                } else {
                    DependencyScope::SameProject(name.clone())
                }
            }
            Self::Detailed {
                target,
                projects,
                dependencies,
            } => {
                if *dependencies {
                    DependencyScope::DependencyProjects(target.clone())
                } else if !projects.is_empty() {
                    DependencyScope::Projects {
                        projects: projects.clone(),
                        target: target.clone(),
                    }
                } else {
                    DependencyScope::SameProject(target.clone())
                }
            }
        }
    }
}

/// Configuration of one target on a project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfiguration {
    /// Executor name, resolved through the executor registry
    pub executor: Option<String>,

    /// Shell command shorthand for the `run-commands` executor
    pub command: Option<String>,

    /// Executor options
    pub options: BTreeMap<String, Value>,

    /// Named option overlays selected with `--configuration`
    pub configurations: BTreeMap<String, BTreeMap<String, Value>>,

    /// Configuration used when none is requested
    pub default_configuration: Option<String>,

    /// Targets that must complete first
    pub depends_on: Option<Vec<TargetDependency>>,

    /// Hash inputs; `None` means `default` plus `^default`
    pub inputs: Option<Vec<InputDefinition>>,

    /// Output paths or globs captured by the cache
    pub outputs: Option<Vec<String>>,

    /// Whether results may be cached
    pub cache: Option<bool>,
}

impl TargetConfiguration {
    /// Target running a shell command
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Default::default()
        }
    }

    /// Effective executor name
    pub fn executor_name(&self) -> &str {
        self.executor.as_deref().unwrap_or(DEFAULT_EXECUTOR)
    }

    /// Whether the target is cacheable
    pub fn is_cacheable(&self) -> bool {
        self.cache.unwrap_or(false)
    }

    /// Overlay this target on top of target defaults.
    ///
    /// Explicit values on the target win; options and configurations are
    /// merged key by key.
    pub fn merged_over(&self, defaults: &TargetConfiguration) -> TargetConfiguration {
        let mut options = defaults.options.clone();
        options.extend(self.options.clone());

        let mut configurations = defaults.configurations.clone();
        for (name, overlay) in &self.configurations {
            configurations
                .entry(name.clone())
                .or_default()
                .extend(overlay.clone());
        }

        TargetConfiguration {
            executor: self.executor.clone().or_else(|| defaults.executor.clone()),
            command: self.command.clone().or_else(|| defaults.command.clone()),
            options,
            configurations,
            default_configuration: self
                .default_configuration
                .clone()
                .or_else(|| defaults.default_configuration.clone()),
            depends_on: self.depends_on.clone().or_else(|| defaults.depends_on.clone()),
            inputs: self.inputs.clone().or_else(|| defaults.inputs.clone()),
            outputs: self.outputs.clone().or_else(|| defaults.outputs.clone()),
            cache: self.cache.or(defaults.cache),
        }
    }

    /// Options with the given configuration overlay applied
    pub fn options_for(&self, configuration: Option<&str>) -> BTreeMap<String, Value> {
        let mut options = self.options.clone();
        if let Some(overlay) = configuration.and_then(|c| self.configurations.get(c)) {
            options.extend(overlay.clone());
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dependency_scope_from_strings() {
        assert_eq!(
            TargetDependency::Name("build".into()).scope(),
            DependencyScope::SameProject("build".into())
        );
        assert_eq!(
            TargetDependency::Name("^build".into()).scope(),
            DependencyScope::DependencyProjects("build".into())
        );
        assert_eq!(
            TargetDependency::Name("shared:codegen".into()).scope(),
            DependencyScope::Projects {
                projects: vec!["shared".into()],
                target: "codegen".into()
            }
        );
    }

    #[test]
    fn test_dependency_scope_from_object() {
        let dep: TargetDependency =
            serde_yaml::from_str("{ target: build, dependencies: true }").unwrap();
        assert_eq!(dep.scope(), DependencyScope::DependencyProjects("build".into()));
    }

    #[test]
    fn test_merged_over_defaults() {
        let defaults = TargetConfiguration {
            cache: Some(true),
            outputs: Some(vec!["{projectRoot}/dist".into()]),
            depends_on: Some(vec![TargetDependency::Name("^build".into())]),
            options: BTreeMap::from([
                ("mode".to_string(), json!("prod")),
                ("minify".to_string(), json!(true)),
            ]),
            ..Default::default()
        };
        let target = TargetConfiguration {
            command: Some("tsc".into()),
            options: BTreeMap::from([("mode".to_string(), json!("dev"))]),
            ..Default::default()
        };

        let merged = target.merged_over(&defaults);
        assert_eq!(merged.command.as_deref(), Some("tsc"));
        assert!(merged.is_cacheable());
        assert_eq!(merged.options["mode"], json!("dev"));
        assert_eq!(merged.options["minify"], json!(true));
        assert_eq!(merged.outputs, Some(vec!["{projectRoot}/dist".to_string()]));
        assert_eq!(merged.executor_name(), DEFAULT_EXECUTOR);
    }

    #[test]
    fn test_options_for_configuration() {
        let target = TargetConfiguration {
            options: BTreeMap::from([("optimize".to_string(), json!(false))]),
            configurations: BTreeMap::from([(
                "production".to_string(),
                BTreeMap::from([("optimize".to_string(), json!(true))]),
            )]),
            ..Default::default()
        };

        assert_eq!(target.options_for(None)["optimize"], json!(false));
        assert_eq!(target.options_for(Some("production"))["optimize"], json!(true));
        assert_eq!(target.options_for(Some("missing"))["optimize"], json!(false));
    }
}
