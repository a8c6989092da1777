use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::OsFamily;
use crate::error::ExecError;

/// How long to keep draining pipes after the process itself has exited.
/// Background jobs started by the command may hold them open forever.
const DRAIN_GRACE: Duration = Duration::from_millis(500);
/// Drain time after a timeout kill; the pipes close as soon as the group is gone.
const KILL_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub command: String,
    pub working_directory: PathBuf,
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Host shell used to interpret command strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSpec {
    program: String,
    flag: String,
}

impl ShellSpec {
    pub fn for_os(os: OsFamily) -> Self {
        match os {
            OsFamily::Windows => Self::custom("cmd"),
            _ => Self::custom("sh"),
        }
    }

    pub fn custom(program: &str) -> Self {
        let lower = program.to_lowercase();
        let flag = if lower == "cmd" || lower.ends_with("cmd.exe") {
            "/C"
        } else {
            "-c"
        };
        Self {
            program: program.to_string(),
            flag: flag.to_string(),
        }
    }
}

type LineBuffer = Arc<Mutex<Vec<String>>>;

pub struct CommandExecutor {
    shell: ShellSpec,
}

impl CommandExecutor {
    pub fn new(shell: ShellSpec) -> Self {
        Self { shell }
    }

    pub async fn execute(
        &self,
        command: &str,
        working_directory: &Path,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecError> {
        let started_at = Utc::now();
        let start_time = Instant::now();
        debug!(command, cwd = %working_directory.display(), "spawning");

        let mut cmd = Command::new(&self.shell.program);
        cmd.arg(&self.shell.flag)
            .arg(command)
            .current_dir(working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down everything the shell started.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| ExecError::LaunchFailed(format!("{}: {e}", self.shell.program)))?;

        let stdout_buf: LineBuffer = Arc::default();
        let stderr_buf: LineBuffer = Arc::default();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(collect_lines(stdout, Arc::clone(&stdout_buf))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(collect_lines(stderr, Arc::clone(&stderr_buf))));
        }

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status.map_err(|e| ExecError::LaunchFailed(e.to_string()))?,
            Err(_) => {
                warn!(command, timeout_secs = timeout.as_secs_f64(), "command timed out, killing");
                terminate(&mut child).await;
                stop_readers(readers, KILL_GRACE).await;
                return Err(ExecError::Timeout {
                    after: timeout,
                    stdout: take_lines(&stdout_buf),
                    stderr: take_lines(&stderr_buf),
                });
            }
        };

        stop_readers(readers, DRAIN_GRACE).await;
        let duration = start_time.elapsed();
        let exit_code = status.code().unwrap_or(-1);
        info!(command, exit_code, duration_ms = duration.as_millis() as u64, "command finished");

        Ok(ExecutionResult {
            command: command.to_string(),
            working_directory: working_directory.to_path_buf(),
            exit_code,
            stdout: take_lines(&stdout_buf),
            stderr: take_lines(&stderr_buf),
            duration,
            started_at,
        })
    }
}

async fn collect_lines<R>(reader: R, sink: LineBuffer) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        let bytes_read = reader.read_until(b'\n', &mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buffer);
        let line = line.trim_end_matches('\n').trim_end_matches('\r');
        if let Ok(mut lines) = sink.lock() {
            lines.push(line.to_string());
        }
    }
    Ok(())
}

/// Waits up to `grace` for the readers to hit end-of-stream, then aborts them.
async fn stop_readers(readers: Vec<JoinHandle<std::io::Result<()>>>, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    for mut reader in readers {
        match tokio::time::timeout_at(deadline, &mut reader).await {
            Ok(Ok(Err(e))) => debug!(error = %e, "output reader stopped early"),
            Ok(_) => {}
            Err(_) => reader.abort(),
        }
    }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: plain syscall; a negative pid addresses the process group we created.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn take_lines(buffer: &LineBuffer) -> Vec<String> {
    buffer
        .lock()
        .map(|mut lines| std::mem::take(&mut *lines))
        .unwrap_or_default()
}
