//! CLI commands

mod cache;
mod completions;
mod graph;
mod init;
mod run;

pub use cache::CacheCommand;
pub use completions::CompletionsCommand;
pub use graph::GraphCommand;
pub use init::InitCommand;
pub use run::RunCommand;
