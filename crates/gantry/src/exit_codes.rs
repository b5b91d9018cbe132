//! Exit codes for the CLI

use gantry_core::{ConfigError, GantryError, ProjectGraphError};
use gantry_tasks::orchestrator::OrchestratorError;
use gantry_tasks::task_graph::TaskGraphError;

/// Success
pub const SUCCESS: i32 = 0;

/// A task failed, or a general error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// Project or task graph error
pub const GRAPH_ERROR: i32 = 3;

/// User cancelled
pub const CANCELLED: i32 = gantry_tasks::executor::CANCELLED_EXIT_CODE;

/// Exit code for an error that aborted a command
pub fn for_error(error: &anyhow::Error) -> i32 {
    if let Some(e) = error.downcast_ref::<GantryError>() {
        return match e {
            GantryError::Config(_) => CONFIG_ERROR,
            GantryError::ProjectGraph(_) => GRAPH_ERROR,
            _ => ERROR,
        };
    }
    if error.downcast_ref::<ConfigError>().is_some() {
        return CONFIG_ERROR;
    }
    if error.downcast_ref::<ProjectGraphError>().is_some()
        || error.downcast_ref::<TaskGraphError>().is_some()
        || error.downcast_ref::<OrchestratorError>().is_some()
    {
        return GRAPH_ERROR;
    }
    ERROR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let config = anyhow::Error::from(GantryError::Config(ConfigError::ParseError("bad".into())));
        assert_eq!(for_error(&config), CONFIG_ERROR);

        let graph = anyhow::Error::from(TaskGraphError::Cycle(vec!["a:build".into(), "a:build".into()]));
        assert_eq!(for_error(&graph), GRAPH_ERROR);

        let project = anyhow::Error::from(ProjectGraphError::DuplicateProject("web".into()));
        assert_eq!(for_error(&project), GRAPH_ERROR);

        assert_eq!(for_error(&anyhow::anyhow!("boom")), ERROR);
        assert_eq!(CANCELLED, 130);
    }
}
