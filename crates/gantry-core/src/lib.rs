//! Gantry Core - configuration, errors and the project graph
//!
//! This crate provides the types shared by the task engine and the CLI:
//! workspace configuration loading, the project graph, and generic graph
//! utilities used by both the project and task graphs.

pub mod config;
pub mod error;
pub mod graph_utils;
pub mod project_graph;

pub use config::{Config, OutputStyle, Parallelism, TasksConfig};
pub use error::{ConfigError, GantryError, ProjectGraphError, Result};
pub use graph_utils::{find_cycle, make_acyclic, DependencyGraph, MutableDependencyGraph};
pub use project_graph::{
    DependencyKind, ExternalNode, InputDefinition, ProjectGraph, ProjectNode, TargetConfiguration,
    TargetDependency,
};
