//! Output formatting utilities

use console::{style, Style};

use gantry_tasks::TaskStatus;

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for paths
pub fn path_style() -> Style {
    Style::new().cyan()
}

/// Symbol and style for a task status
pub fn status_marker(status: TaskStatus) -> (&'static str, Style) {
    match status {
        TaskStatus::Success => ("✓", Style::new().green()),
        TaskStatus::LocalCacheHit | TaskStatus::RemoteCacheHit => ("✓", Style::new().cyan()),
        TaskStatus::Failure => ("✗", Style::new().red()),
        TaskStatus::Skipped => ("○", Style::new().yellow()),
    }
}

/// `s` when `count` is not one
pub fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural() {
        assert_eq!(plural(1), "");
        assert_eq!(plural(0), "s");
        assert_eq!(plural(3), "s");
    }

    #[test]
    fn test_status_marker() {
        assert_eq!(status_marker(TaskStatus::Failure).0, "✗");
        assert_eq!(status_marker(TaskStatus::RemoteCacheHit).0, "✓");
        assert_eq!(status_marker(TaskStatus::Skipped).0, "○");
    }
}
