//! Running the external dump, extraction and load utilities.
//!
//! Every child process is tied to the run's cancellation token. On
//! cancellation the child gets SIGTERM, then SIGKILL after a grace period,
//! and the caller sees `MyBackupError::Cancelled`.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::utils::{MyBackupError, Result};

const TERMINATE_GRACE: Duration = Duration::from_secs(10);

/// Invocation of an external utility.
#[derive(Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    stdin: Option<String>,
}

impl ToolCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.envs.push((key.to_string(), value.into()));
        self
    }

    /// Data written to the child's stdin, then closed. Used for passwords.
    pub fn stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn build(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);
        command
    }
}

// Arguments may carry passwords; only the program name is printed.
impl std::fmt::Debug for ToolCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCommand")
            .field("program", &self.program)
            .field("args", &self.args.len())
            .finish()
    }
}

/// Run `cmd` to completion with stdout/stderr passed through.
pub async fn run(cmd: &ToolCommand, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(MyBackupError::Cancelled);
    }

    let mut command = cmd.build();
    command
        .stdin(if cmd.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    debug!(program = cmd.program(), "starting external tool");
    let mut child = command
        .spawn()
        .map_err(|e| MyBackupError::tool(cmd.program(), format!("failed to start: {}", e)))?;

    if let Some(input) = &cmd.stdin {
        if let Some(mut pipe) = child.stdin.take() {
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                terminate(&mut child, cmd.program()).await;
                return Err(MyBackupError::tool(
                    cmd.program(),
                    format!("failed to write stdin: {}", e),
                ));
            }
            // Closing stdin lets the tool stop waiting for more input.
            drop(pipe);
        }
    }

    let status = tokio::select! {
        status = child.wait() => status
            .map_err(|e| MyBackupError::tool(cmd.program(), e.to_string()))?,
        _ = cancel.cancelled() => {
            terminate(&mut child, cmd.program()).await;
            return Err(MyBackupError::Cancelled);
        }
    };

    check_status(cmd.program(), status)
}

/// Run `producer | consumer`. Both must succeed; the producer's failure is
/// reported first unless a signal ended it while the consumer failed.
pub async fn run_pipeline(
    producer: &ToolCommand,
    consumer: &ToolCommand,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(MyBackupError::Cancelled);
    }

    let mut upstream = producer.build();
    upstream
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    let mut first = upstream
        .spawn()
        .map_err(|e| MyBackupError::tool(producer.program(), format!("failed to start: {}", e)))?;

    let pipe = match first.stdout.take() {
        Some(pipe) => pipe,
        None => {
            terminate(&mut first, producer.program()).await;
            return Err(MyBackupError::tool(producer.program(), "stdout was not captured"));
        }
    };
    let pipe: Stdio = match pipe.try_into() {
        Ok(pipe) => pipe,
        Err(e) => {
            terminate(&mut first, producer.program()).await;
            return Err(MyBackupError::tool(producer.program(), format!("cannot pipe stdout: {}", e)));
        }
    };

    let mut downstream = consumer.build();
    downstream
        .stdin(pipe)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    let mut second = match downstream.spawn() {
        Ok(child) => child,
        Err(e) => {
            terminate(&mut first, producer.program()).await;
            return Err(MyBackupError::tool(consumer.program(), format!("failed to start: {}", e)));
        }
    };

    let (first_status, second_status) = tokio::select! {
        statuses = async { tokio::join!(first.wait(), second.wait()) } => statuses,
        _ = cancel.cancelled() => {
            terminate(&mut first, producer.program()).await;
            terminate(&mut second, consumer.program()).await;
            return Err(MyBackupError::Cancelled);
        }
    };

    let first_status =
        first_status.map_err(|e| MyBackupError::tool(producer.program(), e.to_string()))?;
    let second_status =
        second_status.map_err(|e| MyBackupError::tool(consumer.program(), e.to_string()))?;

    // A producer killed by SIGPIPE only means the consumer stopped reading
    if !second_status.success() && first_status.signal().is_some() {
        return check_status(consumer.program(), second_status);
    }
    check_status(producer.program(), first_status)?;
    check_status(consumer.program(), second_status)
}

fn check_status(program: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(MyBackupError::tool(program, format!("exited with {}", status)))
    }
}

/// SIGTERM, wait a grace period, then SIGKILL.
async fn terminate(child: &mut Child, program: &str) {
    if let Some(raw) = child.id().and_then(|id| i32::try_from(id).ok()) {
        match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => {
                if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok() {
                    warn!(program, "external tool terminated");
                    return;
                }
                warn!(program, "external tool ignored SIGTERM, killing");
            }
            Err(e) => warn!(program, error = %e, "failed to send SIGTERM"),
        }
    }

    if let Err(e) = child.kill().await {
        warn!(program, error = %e, "failed to kill external tool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_tool() {
        let cancel = CancellationToken::new();
        let cmd = ToolCommand::new("true");
        assert!(run(&cmd, &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_tool_is_external_tool_error() {
        let cancel = CancellationToken::new();
        let cmd = ToolCommand::new("false");
        let err = run(&cmd, &cancel).await.unwrap_err();
        assert!(matches!(err, MyBackupError::ExternalTool { ref tool, .. } if tool == "false"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_external_tool_error() {
        let cancel = CancellationToken::new();
        let cmd = ToolCommand::new("mybackup-definitely-not-installed");
        let err = run(&cmd, &cancel).await.unwrap_err();
        assert!(matches!(err, MyBackupError::ExternalTool { .. }));
    }

    #[tokio::test]
    async fn test_stdin_is_delivered() {
        let cancel = CancellationToken::new();
        let cmd = ToolCommand::new("sh")
            .args(["-c", "read pw; test \"$pw\" = secret"])
            .stdin("secret\n");
        assert!(run(&cmd, &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_terminates_child() {
        let cancel = CancellationToken::new();
        let cmd = ToolCommand::new("sleep").arg("30");

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = run(&cmd, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_pipeline_passes_data() {
        let cancel = CancellationToken::new();
        let producer = ToolCommand::new("printf").arg("restore-me");
        let consumer = ToolCommand::new("grep").args(["-q", "restore-me"]);
        assert!(run_pipeline(&producer, &consumer, &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_pipeline_reports_producer_failure() {
        let cancel = CancellationToken::new();
        let producer = ToolCommand::new("false");
        let consumer = ToolCommand::new("cat");
        let err = run_pipeline(&producer, &consumer, &cancel).await.unwrap_err();
        assert!(matches!(err, MyBackupError::ExternalTool { ref tool, .. } if tool == "false"));
    }

    #[tokio::test]
    async fn test_pipeline_blames_consumer_when_producer_gets_sigpipe() {
        let cancel = CancellationToken::new();
        let producer = ToolCommand::new("yes");
        let consumer = ToolCommand::new("sh").args(["-c", "exit 3"]);
        let err = run_pipeline(&producer, &consumer, &cancel).await.unwrap_err();
        assert!(matches!(err, MyBackupError::ExternalTool { ref tool, .. } if tool == "sh"));
    }
}
