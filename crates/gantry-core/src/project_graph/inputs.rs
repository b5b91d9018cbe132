//! Input definitions referenced by targets and named inputs

use serde::{Deserialize, Serialize};

/// Name of the named input used when a project does not define one
pub const DEFAULT_NAMED_INPUT: &str = "default";

/// Fileset used for the `default` named input when nothing else is configured
pub const DEFAULT_FILESET: &str = "{projectRoot}/**/*";

/// One entry in a target's `inputs` or a named input definition.
///
/// Plain strings cover the common forms:
/// - `default` refers to a named input of the same project
/// - `^production` refers to a named input of every dependency project
/// - `{projectRoot}/src/**/*` or `!{projectRoot}/**/*.md` is a fileset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputDefinition {
    /// Named input, `^` dependency reference, or fileset
    String(String),
    /// Explicit fileset
    Fileset { fileset: String },
    /// Shell command whose trimmed stdout is hashed
    Runtime { runtime: String },
    /// Environment variable
    Env { env: String },
    /// External packages whose versions are hashed
    ExternalDependencies {
        #[serde(alias = "externalDependencies")]
        external_dependencies: Vec<String>,
    },
    /// Files produced by dependency tasks
    DependentTasksOutputFiles {
        #[serde(alias = "dependentTasksOutputFiles")]
        dependent_tasks_output_files: String,
        #[serde(default)]
        transitive: bool,
    },
    /// Named input reference in object form
    Input {
        input: String,
        #[serde(default)]
        dependencies: bool,
    },
}

impl InputDefinition {
    /// Shorthand for a plain string input
    pub fn named(name: impl Into<String>) -> Self {
        Self::String(name.into())
    }

    /// Shorthand for a fileset input
    pub fn fileset(pattern: impl Into<String>) -> Self {
        Self::Fileset {
            fileset: pattern.into(),
        }
    }
}

/// Whether a plain string input is a fileset rather than a named input reference
pub fn is_fileset(input: &str) -> bool {
    let input = input.strip_prefix('!').unwrap_or(input);
    input.starts_with("{projectRoot}")
        || input.starts_with("{workspaceRoot}")
        || input.contains('/')
        || input.contains('*')
}

/// The inputs used when a target does not declare any
pub fn default_target_inputs() -> Vec<InputDefinition> {
    vec![
        InputDefinition::named(DEFAULT_NAMED_INPUT),
        InputDefinition::named(format!("^{}", DEFAULT_NAMED_INPUT)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_inputs() {
        let yaml = r#"
- default
- ^production
- "{projectRoot}/src/**/*"
- fileset: "{workspaceRoot}/babel.config.json"
- runtime: node --version
- env: CI
- external_dependencies: ["npm:react"]
- dependentTasksOutputFiles: "**/*.d.ts"
  transitive: true
- input: production
  dependencies: true
"#;
        let inputs: Vec<InputDefinition> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(inputs.len(), 9);
        assert_eq!(inputs[0], InputDefinition::named("default"));
        assert_eq!(
            inputs[4],
            InputDefinition::Runtime {
                runtime: "node --version".to_string()
            }
        );
        assert_eq!(
            inputs[7],
            InputDefinition::DependentTasksOutputFiles {
                dependent_tasks_output_files: "**/*.d.ts".to_string(),
                transitive: true,
            }
        );
        assert_eq!(
            inputs[8],
            InputDefinition::Input {
                input: "production".to_string(),
                dependencies: true,
            }
        );
    }

    #[test]
    fn test_is_fileset() {
        assert!(is_fileset("{projectRoot}/**/*"));
        assert!(is_fileset("!{projectRoot}/**/*.spec.ts"));
        assert!(is_fileset("{workspaceRoot}/jest.preset.js"));
        assert!(!is_fileset("production"));
        assert!(!is_fileset("default"));
    }
}
