//! Cache management command

use std::time::Duration;

use clap::{Args, Subcommand};
use console::style;

use gantry_tasks::TaskCache;

use crate::cli::output;
use crate::cli::{Cli, OutputFormat, Workspace};
use crate::exit_codes;

/// Task cache management
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Remove old cache entries
    Prune(CachePruneCommand),
    /// Show cache statistics
    Status(CacheStatusCommand),
    /// Clear all cached entries
    Clean(CacheCleanCommand),
}

/// Prune old cache entries
#[derive(Debug, Args)]
pub struct CachePruneCommand {
    /// Maximum age in days (default: `tasks.max_cache_age_days`)
    #[arg(long)]
    pub max_age_days: Option<u64>,
}

/// Show cache statistics
#[derive(Debug, Args)]
pub struct CacheStatusCommand;

/// Clear all cached entries
#[derive(Debug, Args)]
pub struct CacheCleanCommand {
    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl CacheCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let workspace = Workspace::load()?;
        let cache = TaskCache::new(&workspace.root, &workspace.config.tasks.cache_directory);

        match &self.action {
            CacheAction::Prune(cmd) => cmd.execute(cli, &workspace, &cache)?,
            CacheAction::Status(cmd) => cmd.execute(cli, &cache)?,
            CacheAction::Clean(cmd) => cmd.execute(cli, &cache)?,
        }
        Ok(exit_codes::SUCCESS)
    }
}

impl CachePruneCommand {
    fn execute(&self, cli: &Cli, workspace: &Workspace, cache: &TaskCache) -> anyhow::Result<()> {
        let days = self
            .max_age_days
            .unwrap_or(workspace.config.tasks.max_cache_age_days);
        let max_age = Duration::from_secs(days * 24 * 60 * 60);

        if cli.prints_text() {
            output::info(&format!("Pruning cache entries older than {} days...", days));
        }

        let stats = cache.remove_old_cache_records(max_age)?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else if !cli.quiet {
            println!(
                "  {} Removed {} of {} entries ({} kept)",
                style("✓").green(),
                stats.removed,
                stats.total,
                stats.kept
            );
        }

        Ok(())
    }
}

impl CacheStatusCommand {
    fn execute(&self, cli: &Cli, cache: &TaskCache) -> anyhow::Result<()> {
        let stats = cache.status()?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "entries": stats.entries,
                "total_size": stats.total_size,
                "total_size_formatted": stats.formatted_size(),
                "cache_dir": cache.cache_dir().display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!("{}", output::header("Task Cache Status"));
            println!();
            println!("  Location: {}", output::path_style().apply_to(cache.cache_dir().display()));
            println!("  Entries:  {}", stats.entries);
            println!("  Size:     {}", style(stats.formatted_size()).yellow());
        }

        Ok(())
    }
}

impl CacheCleanCommand {
    fn execute(&self, cli: &Cli, cache: &TaskCache) -> anyhow::Result<()> {
        let cache_dir = cache.cache_dir().to_path_buf();

        if !cache_dir.exists() {
            if !cli.quiet {
                output::success("Cache directory does not exist.");
            }
            return Ok(());
        }

        if !self.yes {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(format!(
                    "Remove all cached entries at {}?",
                    cache_dir.display()
                ))
                .default(false)
                .interact()?;

            if !confirmed {
                println!("{}", style("Aborted.").yellow());
                return Ok(());
            }
        }

        let removed = cache.clear()?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::json!({ "removed": removed }));
        } else if !cli.quiet {
            output::success(&format!(
                "Removed {} entr{} from {}",
                removed,
                if removed == 1 { "y" } else { "ies" },
                output::path_style().apply_to(cache_dir.display())
            ));
        }

        Ok(())
    }
}
