use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ClipError, Result};
use crate::media::MediaCommand;

/// Number of stderr lines kept for error reports
pub const STDERR_TAIL_LINES: usize = 40;

/// Longest line kept in memory, in bytes; the rest of the line is dropped
const MAX_LINE_BYTES: usize = 4096;

/// Result of a finished child process
#[derive(Debug)]
pub struct ProcessOutcome {
    pub status: ExitStatus,
    pub stdout: Vec<String>,
    /// Last [`STDERR_TAIL_LINES`] lines written to stderr
    pub stderr: Vec<String>,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Human readable exit status, e.g. "exit code 1"
    pub fn status_text(&self) -> String {
        match self.status.code() {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }

    pub fn stderr_tail(&self) -> String {
        self.stderr.join("\n")
    }
}

/// How long pipes are drained once the process has exited
const STREAM_DRAIN: Duration = Duration::from_millis(500);

/// Spawn `command`, stream its stdout line by line into `on_stdout` while
/// collecting the stderr tail, and wait for the exit status.
///
/// Output is consumed as it is produced. The exit status decides the outcome:
/// once the process has exited its pipes are drained for a short while and then
/// dropped, even if a leftover helper still holds them open. A non-zero exit
/// status is not an error here: callers decide what it means.
///
/// The child runs in its own process group. When `deadline` elapses the whole
/// group is killed and [`ClipError::Timeout`] is returned; helpers still alive
/// after a normal exit are killed as well.
pub async fn run_streaming<F>(
    command: &MediaCommand,
    deadline: Option<Duration>,
    mut on_stdout: F,
) -> Result<ProcessOutcome>
where
    F: FnMut(&str),
{
    let program = command.program_name();
    debug!("Executing {}: {}", command.description, command);

    let mut cmd = command.to_command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| ClipError::Spawn {
        program: program.clone(),
        source,
    })?;
    let mut group = ProcessGroup::new(child.id());

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ClipError::Internal(format!("{} stdout was not captured", program)))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ClipError::Internal(format!("{} stderr was not captured", program)))?;

    let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
    let mut stderr_task = {
        let tail = Arc::clone(&tail);
        let program = program.clone();
        tokio::spawn(async move {
            let mut reader = LineReader::new(stderr);
            while let Ok(Some(lines)) = reader.next_lines().await {
                let mut tail = tail.lock().await;
                for line in lines {
                    debug!("{} stderr: {}", program, line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
        })
    };

    let mut captured = Vec::new();
    let mut forward = |lines: Vec<String>| {
        for line in lines {
            debug!("{} stdout: {}", program, line);
            on_stdout(&line);
            captured.push(line);
        }
    };

    let run = async {
        let mut reader = LineReader::new(stdout);
        let mut stdout_open = true;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                read = reader.next_lines(), if stdout_open => match read? {
                    Some(lines) => forward(lines),
                    None => stdout_open = false,
                },
            }
        };

        // Anything the tool left running would keep the pipes open
        group.kill();

        if stdout_open {
            let drain = async {
                while let Some(lines) = reader.next_lines().await? {
                    forward(lines);
                }
                Ok::<_, std::io::Error>(())
            };
            match tokio::time::timeout(STREAM_DRAIN, drain).await {
                Ok(result) => result?,
                Err(_) => debug!("{} exited with its stdout still open, dropping it", program),
            }
        }
        Ok::<_, std::io::Error>(status)
    };

    let finished = match deadline {
        Some(limit) => tokio::time::timeout(limit, run).await.ok(),
        None => Some(run.await),
    };

    let status = match finished {
        Some(result) => result?,
        None => {
            let secs = deadline.map(|limit| limit.as_secs()).unwrap_or_default();
            warn!("{} exceeded its deadline of {}s, killing it", program, secs);
            group.kill();
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {}: {}", program, e);
            }
            stderr_task.abort();
            return Err(ClipError::Timeout { program, secs });
        }
    };

    if tokio::time::timeout(STREAM_DRAIN, &mut stderr_task).await.is_err() {
        debug!("{} stderr is still open, dropping it", program);
        stderr_task.abort();
    }
    let stderr = tail.lock().await.drain(..).collect();

    debug!("{} finished with {}", program, status);
    Ok(ProcessOutcome {
        status,
        stdout: captured,
        stderr,
    })
}

/// Process group of a spawned tool. Dropping it kills whatever is left in the
/// group, so helpers such as the ffmpeg yt-dlp starts never outlive a job.
struct ProcessGroup {
    id: Option<u32>,
}

impl ProcessGroup {
    fn new(id: Option<u32>) -> Self {
        Self { id }
    }

    /// Kill the group once; later calls do nothing, as the id may be reused
    fn kill(&mut self) {
        if let Some(id) = self.id.take() {
            kill_group(id);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(id: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(id) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        // The group is gone once every member has exited
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", id, e),
    }
}

#[cfg(not(unix))]
fn kill_group(_id: u32) {}

/// Splits a byte stream into lines on both `\n` and `\r` as bytes arrive,
/// since progress output rewrites the current line with `\r` alone. Lines
/// longer than [`MAX_LINE_BYTES`] are cut; blank lines are skipped.
struct LineReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    /// Next batch of complete lines, `None` at end of stream.
    ///
    /// Cancel safe: buffered bytes are only consumed after they were moved
    /// into the pending line, with no await in between.
    async fn next_lines(&mut self) -> std::io::Result<Option<Vec<String>>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                let rest = std::mem::take(&mut self.pending);
                return Ok(finish_line(&rest).map(|line| vec![line]));
            }

            let consumed = available.len();
            let mut lines = Vec::new();
            for &byte in available {
                if byte == b'\n' || byte == b'\r' {
                    let line = std::mem::take(&mut self.pending);
                    lines.extend(finish_line(&line));
                } else if self.pending.len() < MAX_LINE_BYTES {
                    self.pending.push(byte);
                }
            }
            self.reader.consume(consumed);

            if !lines.is_empty() {
                return Ok(Some(lines));
            }
        }
    }
}

fn finish_line(bytes: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(bytes);
    (!line.trim().is_empty()).then(|| line.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_line_reader_splits_carriage_returns() {
        let data: &[u8] = b"[download]   5.0%\r[download]  50.0%\r\n[download] Destination: a.mp4\nlast";
        let mut reader = LineReader::new(data);

        let mut lines = Vec::new();
        while let Some(batch) = reader.next_lines().await.unwrap() {
            lines.extend(batch);
        }
        assert_eq!(
            lines,
            vec![
                "[download]   5.0%",
                "[download]  50.0%",
                "[download] Destination: a.mp4",
                "last"
            ]
        );
    }

    #[tokio::test]
    async fn test_line_reader_caps_unterminated_progress() {
        let mut data = vec![b'x'; MAX_LINE_BYTES * 4];
        data.extend_from_slice(b"\rdone\n");
        let mut reader = LineReader::new(data.as_slice());

        let first = reader.next_lines().await.unwrap().unwrap();
        assert_eq!(first[0].len(), MAX_LINE_BYTES);
        assert_eq!(first.last().map(String::as_str), Some("done"));
        assert!(reader.pending.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_stdout_and_keeps_stderr_tail() {
        let command = MediaCommand::new("sh", "Echo test")
            .arg("-c")
            .arg("echo one; echo two; echo oops >&2; exit 3");

        let mut seen = Vec::new();
        let outcome = run_streaming(&command, None, |line| seen.push(line.to_string()))
            .await
            .unwrap();

        assert_eq!(seen, vec!["one", "two"]);
        assert_eq!(outcome.exit_code(), Some(3));
        assert!(!outcome.success());
        assert_eq!(outcome.stderr_tail(), "oops");
        assert_eq!(outcome.status_text(), "exit code 3");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deadline_kills_the_child() {
        let command = MediaCommand::new("sh", "Sleep test").arg("-c").arg("sleep 30");

        let started = std::time::Instant::now();
        let err = run_streaming(&command, Some(Duration::from_millis(200)), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, ClipError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_wins_over_open_pipes() {
        let command = MediaCommand::new("sh", "Background helper test")
            .arg("-c")
            .arg("echo done; sleep 5 & exit 0");

        let started = std::time::Instant::now();
        let mut seen = Vec::new();
        let outcome = run_streaming(&command, Some(Duration::from_secs(3)), |line| {
            seen.push(line.to_string())
        })
        .await
        .unwrap();

        assert!(outcome.success());
        assert_eq!(seen, vec!["done"]);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_without_deadline_does_not_wait_for_helpers() {
        let command = MediaCommand::new("sh", "Background helper test")
            .arg("-c")
            .arg("sleep 5 & echo oops >&2; exit 2");

        let started = std::time::Instant::now();
        let outcome = run_streaming(&command, None, |_| {}).await.unwrap();

        assert_eq!(outcome.exit_code(), Some(2));
        assert_eq!(outcome.stderr_tail(), "oops");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deadline_kills_helpers_of_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let late = dir.path().join("late.txt");
        let script = format!("(sleep 1; echo late > '{}') & sleep 30", late.display());
        let command = MediaCommand::new("sh", "Helper test").arg("-c").arg(script);

        let err = run_streaming(&command, Some(Duration::from_millis(200)), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ClipError::Timeout { .. }));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!late.exists());
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let command = MediaCommand::new("/nonexistent/segclip-tool", "Missing tool");
        let err = run_streaming(&command, None, |_| {}).await.unwrap_err();
        assert!(matches!(err, ClipError::Spawn { .. }));
    }
}
