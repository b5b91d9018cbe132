//! Expansion of target inputs into a hash plan

use gantry_core::project_graph::inputs::is_fileset;
use gantry_core::project_graph::{InputDefinition, ProjectNode, DEFAULT_FILESET, DEFAULT_NAMED_INPUT};

/// A reference to inputs of dependency projects (`^name` entries)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyInput {
    /// A named input, hashed in every dependency project
    Named(String),
    /// A fileset anchored at every dependency project's root
    Fileset(String),
}

impl DependencyInput {
    /// Label used in hash details
    pub fn label(&self) -> &str {
        match self {
            Self::Named(name) | Self::Fileset(name) => name,
        }
    }
}

/// Files produced by dependency tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyOutputs {
    pub glob: String,
    pub transitive: bool,
}

/// Inputs of one target, with named inputs expanded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashPlan {
    /// Filesets of the project itself, tokens not yet substituted
    pub filesets: Vec<String>,
    /// Shell commands whose output is hashed
    pub runtime: Vec<String>,
    /// Environment variable names
    pub env: Vec<String>,
    /// Explicitly listed external packages; `None` means all of the project's
    pub external: Option<Vec<String>>,
    /// Outputs of dependency tasks
    pub dependency_outputs: Vec<DependencyOutputs>,
    /// Inputs of dependency projects
    pub dependency_inputs: Vec<DependencyInput>,
}

impl HashPlan {
    /// Expand a target's inputs against the project's named inputs
    pub fn expand(project: &ProjectNode, inputs: &[InputDefinition]) -> Result<Self, InputError> {
        let mut plan = Self::default();
        let mut stack = Vec::new();
        plan.add_all(project, inputs, &mut stack)?;
        plan.dedup();
        Ok(plan)
    }

    /// Expand a single named input (or fileset) as it is hashed for a
    /// dependent project
    pub fn expand_named(project: &ProjectNode, input: &str) -> Result<Self, InputError> {
        Self::expand(project, &[InputDefinition::named(input)])
    }

    fn add_all(
        &mut self,
        project: &ProjectNode,
        inputs: &[InputDefinition],
        stack: &mut Vec<String>,
    ) -> Result<(), InputError> {
        for input in inputs {
            self.add(project, input, stack)?;
        }
        Ok(())
    }

    fn add(
        &mut self,
        project: &ProjectNode,
        input: &InputDefinition,
        stack: &mut Vec<String>,
    ) -> Result<(), InputError> {
        match input {
            InputDefinition::String(value) => {
                if let Some(dep) = value.strip_prefix('^') {
                    self.dependency_inputs.push(if is_fileset(dep) {
                        DependencyInput::Fileset(dep.to_string())
                    } else {
                        DependencyInput::Named(dep.to_string())
                    });
                } else if is_fileset(value) {
                    self.filesets.push(value.clone());
                } else {
                    self.add_named(project, value, stack)?;
                }
            }
            InputDefinition::Fileset { fileset } => self.filesets.push(fileset.clone()),
            InputDefinition::Runtime { runtime } => self.runtime.push(runtime.clone()),
            InputDefinition::Env { env } => self.env.push(env.clone()),
            InputDefinition::ExternalDependencies {
                external_dependencies,
            } => self
                .external
                .get_or_insert_with(Vec::new)
                .extend(external_dependencies.iter().cloned()),
            InputDefinition::DependentTasksOutputFiles {
                dependent_tasks_output_files,
                transitive,
            } => self.dependency_outputs.push(DependencyOutputs {
                glob: dependent_tasks_output_files.clone(),
                transitive: *transitive,
            }),
            InputDefinition::Input {
                input,
                dependencies: true,
            } => self
                .dependency_inputs
                .push(DependencyInput::Named(input.clone())),
            InputDefinition::Input {
                input,
                dependencies: false,
            } => self.add_named(project, input, stack)?,
        }
        Ok(())
    }

    fn add_named(
        &mut self,
        project: &ProjectNode,
        name: &str,
        stack: &mut Vec<String>,
    ) -> Result<(), InputError> {
        if stack.iter().any(|n| n == name) {
            return Err(InputError::CircularNamedInput {
                project: project.name.clone(),
                chain: stack.iter().cloned().chain([name.to_string()]).collect(),
            });
        }

        let default_inputs;
        let definition: &[InputDefinition] = match project.named_inputs.get(name) {
            Some(definition) => definition.as_slice(),
            None if name == DEFAULT_NAMED_INPUT => {
                default_inputs = [InputDefinition::fileset(DEFAULT_FILESET)];
                &default_inputs[..]
            }
            None => {
                return Err(InputError::UnknownNamedInput {
                    project: project.name.clone(),
                    name: name.to_string(),
                })
            }
        };

        stack.push(name.to_string());
        let result = self.add_all(project, definition, stack);
        stack.pop();
        result
    }

    fn dedup(&mut self) {
        dedup_in_order(&mut self.filesets);
        dedup_in_order(&mut self.runtime);
        dedup_in_order(&mut self.env);
        dedup_in_order(&mut self.dependency_outputs);
        dedup_in_order(&mut self.dependency_inputs);
        if let Some(external) = &mut self.external {
            dedup_in_order(external);
        }
    }
}

fn dedup_in_order<T: PartialEq + Clone>(items: &mut Vec<T>) {
    let mut seen: Vec<T> = Vec::with_capacity(items.len());
    items.retain(|item| {
        if seen.contains(item) {
            false
        } else {
            seen.push(item.clone());
            true
        }
    });
}

/// Malformed input configuration
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// A named input is referenced but not defined
    #[error("Named input '{name}' is not defined for project '{project}'")]
    UnknownNamedInput { project: String, name: String },

    /// Named inputs reference each other in a loop
    #[error("Named inputs of project '{project}' reference each other: {}", .chain.join(" -> "))]
    CircularNamedInput { project: String, chain: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::project_graph::inputs::default_target_inputs;

    fn project() -> ProjectNode {
        ProjectNode::new("web", "apps/web")
            .with_named_input(
                "default",
                vec![InputDefinition::fileset("{projectRoot}/**/*"), InputDefinition::named("shared")],
            )
            .with_named_input("shared", vec![InputDefinition::Env { env: "NODE_ENV".into() }])
            .with_named_input(
                "production",
                vec![InputDefinition::named("default"), InputDefinition::named("!{projectRoot}/**/*.spec.ts")],
            )
    }

    #[test]
    fn test_expand_default_inputs() {
        let plan = HashPlan::expand(&project(), &default_target_inputs()).unwrap();
        assert_eq!(plan.filesets, vec!["{projectRoot}/**/*"]);
        assert_eq!(plan.env, vec!["NODE_ENV"]);
        assert_eq!(plan.dependency_inputs, vec![DependencyInput::Named("default".into())]);
        assert!(plan.external.is_none());
    }

    #[test]
    fn test_expand_nested_named_inputs() {
        let inputs = vec![InputDefinition::named("production"), InputDefinition::named("^production")];
        let plan = HashPlan::expand(&project(), &inputs).unwrap();
        assert_eq!(plan.filesets, vec!["{projectRoot}/**/*", "!{projectRoot}/**/*.spec.ts"]);
        assert_eq!(plan.dependency_inputs, vec![DependencyInput::Named("production".into())]);
    }

    #[test]
    fn test_missing_default_uses_project_fileset() {
        let bare = ProjectNode::new("lib", "libs/lib");
        let plan = HashPlan::expand_named(&bare, "default").unwrap();
        assert_eq!(plan.filesets, vec![DEFAULT_FILESET]);
    }

    #[test]
    fn test_unknown_named_input() {
        let bare = ProjectNode::new("lib", "libs/lib");
        assert!(matches!(
            HashPlan::expand_named(&bare, "production"),
            Err(InputError::UnknownNamedInput { .. })
        ));
    }

    #[test]
    fn test_circular_named_input() {
        let looping = ProjectNode::new("lib", "libs/lib")
            .with_named_input("a", vec![InputDefinition::named("b")])
            .with_named_input("b", vec![InputDefinition::named("a")]);
        assert!(matches!(
            HashPlan::expand_named(&looping, "a"),
            Err(InputError::CircularNamedInput { .. })
        ));
    }

    #[test]
    fn test_object_inputs() {
        let inputs = vec![
            InputDefinition::Runtime { runtime: "node -v".into() },
            InputDefinition::ExternalDependencies { external_dependencies: vec!["npm:react".into()] },
            InputDefinition::DependentTasksOutputFiles {
                dependent_tasks_output_files: "**/*.d.ts".into(),
                transitive: true,
            },
            InputDefinition::Input { input: "default".into(), dependencies: true },
            InputDefinition::named("^{projectRoot}/package.json"),
        ];
        let plan = HashPlan::expand(&project(), &inputs).unwrap();
        assert_eq!(plan.runtime, vec!["node -v"]);
        assert_eq!(plan.external, Some(vec!["npm:react".to_string()]));
        assert!(plan.dependency_outputs[0].transitive);
        assert_eq!(
            plan.dependency_inputs,
            vec![
                DependencyInput::Named("default".into()),
                DependencyInput::Fileset("{projectRoot}/package.json".into())
            ]
        );
    }
}
