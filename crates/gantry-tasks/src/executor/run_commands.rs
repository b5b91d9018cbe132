use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use super::{task_env, ExecutionContext, Executor, ExecutorError, ExecutorOutput};
use crate::reporter::TaskEvent;
use crate::task::Task;

/// Exit code of a task, or a run, interrupted by cancellation
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// Runs `options.command` (or every entry of `options.commands`, in order)
/// through `sh -c`
#[derive(Debug, Default, Clone, Copy)]
pub struct RunCommandsExecutor;

impl RunCommandsExecutor {
    /// The shell script for a task, overrides appended to each command
    pub fn script(task: &Task) -> Result<String, ExecutorError> {
        let commands: Vec<String> = match (task.option_str("command"), task.options.get("commands")) {
            (Some(command), _) => vec![command.to_string()],
            (None, Some(Value::Array(entries))) => entries
                .iter()
                .filter_map(|entry| match entry {
                    Value::String(command) => Some(command.clone()),
                    Value::Object(object) => object
                        .get("command")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        if commands.is_empty() {
            return Err(ExecutorError::MissingCommand(task.id.clone()));
        }

        let suffix = task.overrides.join(" ");
        let commands: Vec<String> = commands
            .into_iter()
            .map(|c| if suffix.is_empty() { c } else { format!("{} {}", c, suffix) })
            .collect();
        Ok(commands.join(" && "))
    }
}

#[async_trait]
impl Executor for RunCommandsExecutor {
    fn name(&self) -> &str {
        gantry_core::project_graph::DEFAULT_EXECUTOR
    }

    #[instrument(skip_all, fields(task = %task.id))]
    async fn run(&self, task: &Task, ctx: &ExecutionContext) -> Result<ExecutorOutput, ExecutorError> {
        let script = Self::script(task)?;
        let cwd = match task.option_str("cwd") {
            Some(cwd) => ctx.workspace_root.join(cwd),
            None => ctx.workspace_root.join(&task.project_root),
        };
        let env = task_env(&ctx.env, task);
        run_shell(&task.id, &script, &cwd, &env, ctx).await
    }
}

/// Run a script, streaming its lines to the reporter and forwarding
/// cancellation signals to it
async fn run_shell(
    id: &str,
    script: &str,
    cwd: &Path,
    env: &BTreeMap<String, String>,
    ctx: &ExecutionContext,
) -> Result<ExecutorOutput, ExecutorError> {
    debug!(task = id, command = script, cwd = %cwd.display(), "spawning");

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(script)
        .current_dir(cwd)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // own process group so a forwarded signal reaches the whole pipeline
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| ExecutorError::Spawn {
        command: script.to_string(),
        source,
    })?;
    let pid = child.id();

    let (tx, mut rx) = mpsc::unbounded_channel::<(String, bool)>();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, false, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, true, tx.clone()));
    }
    drop(tx);

    let mut terminal_output = String::new();
    let mut record = |line: String, is_stderr: bool| {
        terminal_output.push_str(&line);
        terminal_output.push('\n');
        ctx.reporter.report(&TaskEvent::Output {
            id: id.to_string(),
            line,
            is_stderr,
        });
    };

    let mut cancel = ctx.cancel.clone();
    let mut cancel_open = true;
    let mut cancelled = cancel.borrow().is_some();
    if let Some(signal) = *cancel.borrow() {
        forward_signal(pid, signal);
    }

    let status = loop {
        tokio::select! {
            Some((line, is_stderr)) = rx.recv() => record(line, is_stderr),
            status = child.wait() => break status?,
            changed = cancel.changed(), if cancel_open => match changed {
                Ok(()) => {
                    if let Some(signal) = *cancel.borrow() {
                        warn!(task = id, signal, "forwarding signal");
                        forward_signal(pid, signal);
                        cancelled = true;
                    }
                }
                Err(_) => cancel_open = false,
            },
        }
    };

    // lines still buffered after exit
    while let Some((line, is_stderr)) = rx.recv().await {
        record(line, is_stderr);
    }

    let code = if cancelled {
        CANCELLED_EXIT_CODE
    } else {
        exit_code(&status)
    };
    debug!(task = id, code, "process exited");
    Ok(ExecutorOutput::new(code, terminal_output))
}

async fn forward_lines<R>(reader: R, is_stderr: bool, tx: mpsc::UnboundedSender<(String, bool)>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send((line, is_stderr)).is_err() {
            break;
        }
    }
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(unix)]
fn forward_signal(pid: Option<u32>, signal: i32) {
    if let Some(pid) = pid {
        // negative pid targets the process group
        // SAFETY: kill has no memory-safety preconditions
        unsafe {
            libc::kill(-(pid as libc::pid_t), signal);
        }
    }
}

#[cfg(not(unix))]
fn forward_signal(_pid: Option<u32>, _signal: i32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use crate::task::TaskTarget;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::watch;

    fn context(root: &Path) -> (ExecutionContext, Arc<CollectingReporter>, watch::Sender<Option<i32>>) {
        let reporter = Arc::new(CollectingReporter::default());
        let (tx, rx) = watch::channel(None);
        let ctx = ExecutionContext {
            workspace_root: root.to_path_buf(),
            env: std::env::vars().filter(|(k, _)| k == "PATH").collect(),
            reporter: reporter.clone(),
            cancel: rx,
        };
        (ctx, reporter, tx)
    }

    fn task(command: &str) -> Task {
        Task::new(TaskTarget::new("web", "build"), "").with_command(command)
    }

    #[test]
    fn test_script_from_options() {
        let mut t = task("tsc");
        t.overrides = vec!["--watch".into(), "false".into()];
        assert_eq!(RunCommandsExecutor::script(&t).unwrap(), "tsc --watch false");

        let mut t = Task::new(TaskTarget::new("web", "build"), "");
        t.options.insert(
            "commands".into(),
            serde_json::json!(["echo one", { "command": "echo two" }]),
        );
        assert_eq!(RunCommandsExecutor::script(&t).unwrap(), "echo one && echo two");

        let t = Task::new(TaskTarget::new("web", "build"), "");
        assert!(matches!(
            RunCommandsExecutor::script(&t),
            Err(ExecutorError::MissingCommand(_))
        ));
    }

    #[tokio::test]
    async fn test_runs_and_captures_output() {
        let temp = TempDir::new().unwrap();
        let (ctx, reporter, _tx) = context(temp.path());

        let output = RunCommandsExecutor
            .run(&task("echo out && echo err >&2 && echo $GANTRY_TASK_TARGET_PROJECT"), &ctx)
            .await
            .unwrap();

        assert!(output.success());
        assert!(output.terminal_output.contains("out\n"));
        assert!(output.terminal_output.contains("err\n"));
        assert!(output.terminal_output.contains("web\n"));

        let stderr_lines = reporter
            .events()
            .into_iter()
            .filter(|e| matches!(e, TaskEvent::Output { is_stderr: true, .. }))
            .count();
        assert_eq!(stderr_lines, 1);
    }

    #[tokio::test]
    async fn test_exit_code_and_cwd() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("apps/web")).unwrap();
        let (ctx, _reporter, _tx) = context(temp.path());

        let mut t = task("test \"$(basename \"$PWD\")\" = web && exit 3");
        t.project_root = "apps/web".into();
        let output = RunCommandsExecutor.run(&t, &ctx).await.unwrap();
        assert_eq!(output.code, 3);
    }

    #[tokio::test]
    async fn test_child_env_is_explicit() {
        let temp = TempDir::new().unwrap();
        let (mut ctx, _reporter, _tx) = context(temp.path());
        ctx.env.insert("ONLY_THIS".into(), "yes".into());

        let output = RunCommandsExecutor
            .run(&task("echo \"${ONLY_THIS}-${HOME:-unset}\""), &ctx)
            .await
            .unwrap();
        assert_eq!(output.terminal_output, "yes-unset\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_forwards_signal() {
        let temp = TempDir::new().unwrap();
        let (ctx, _reporter, tx) = context(temp.path());

        let handle = tokio::spawn(async move { RunCommandsExecutor.run(&task("sleep 30"), &ctx).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(Some(libc::SIGTERM)).unwrap();

        let output = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(output.code, CANCELLED_EXIT_CODE);
    }
}
