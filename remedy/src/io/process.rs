//! Helpers for running child processes under a deadline with bounded output.

use std::io::{ErrorKind, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::budget::{Deadline, Interrupted};
use crate::core::types::IssueContext;

/// Granularity at which a running child is checked for cancellation.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    /// Set when the child was killed because of cancellation or the deadline.
    pub interrupted: Option<Interrupted>,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if self.stdout_truncated > 0 {
            text.push_str(&format!(
                "\n[stdout truncated {} bytes]",
                self.stdout_truncated
            ));
        }
        text
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Run a command until it exits, the deadline passes or the call is cancelled.
///
/// Output is read concurrently while the child runs so neither pipe can fill
/// up. `output_limit_bytes` bounds what is kept in memory; the rest is drained
/// and counted.
#[instrument(skip_all, fields(output_limit_bytes))]
pub fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    deadline: &Deadline,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if let Err(reason) = deadline.remaining() {
        return Err(anyhow!(reason)).context("command not started");
    }
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    // Fed from its own thread so the poll loop below starts immediately even
    // when the child never drains a large stdin.
    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || child_stdin.write_all(&input)))
        }
        None => None,
    };

    let mut interrupted = None;
    let status = loop {
        let slice = match deadline.remaining() {
            Ok(remaining) => remaining.min(POLL_SLICE),
            Err(reason) => {
                warn!(%reason, "command interrupted, killing");
                interrupted = Some(reason);
                child.kill().context("kill command")?;
                break child.wait().context("wait command after kill")?;
            }
        };
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            break status;
        }
    };

    if let Some(handle) = stdin_handle {
        match handle.join() {
            Ok(Ok(())) => {}
            // The child exited or was killed before reading everything; its
            // status tells the story.
            Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {
                debug!("child closed stdin early");
            }
            Ok(Err(e)) => warn!(err = %e, "failed to write full stdin"),
            Err(_) => warn!("stdin writer thread panicked"),
        }
    }

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), ?interrupted, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        interrupted,
    })
}

/// Build a [`Command`] from an argv-style list.
pub fn command_from_argv(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command must be a non-empty array"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Environment describing the target resource, passed to every adapter command.
pub fn issue_env(issue: &IssueContext) -> Vec<(String, String)> {
    vec![
        ("REMEDY_ISSUE".to_string(), issue.issue_name.clone()),
        ("REMEDY_NAMESPACE".to_string(), issue.namespace.clone()),
        ("REMEDY_RESOURCE_KIND".to_string(), issue.resource_kind.clone()),
        ("REMEDY_RESOURCE_NAME".to_string(), issue.resource_name.clone()),
    ]
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_stdin() {
        let deadline = Deadline::after(Duration::from_secs(10));
        let output = run_command(sh("cat"), Some(b"hello"), &deadline, 1024).expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout, b"hello");
        assert!(output.interrupted.is_none());
    }

    #[test]
    fn bounds_captured_output() {
        let deadline = Deadline::after(Duration::from_secs(10));
        let output = run_command(sh("printf 0123456789"), None, &deadline, 4).expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
        assert!(output.stdout_text().contains("[stdout truncated 6 bytes]"));
    }

    #[test]
    fn deadline_kills_child() {
        let deadline = Deadline::after(Duration::from_millis(300));
        let started = Instant::now();
        let output = run_command(sh("exec sleep 5"), None, &deadline, 1024).expect("run");
        assert_eq!(output.interrupted, Some(Interrupted::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn cancellation_kills_child() {
        let deadline = Deadline::after(Duration::from_secs(30));
        let handle = deadline.cancel_handle();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            handle.cancel();
        });
        let output = run_command(sh("exec sleep 5"), None, &deadline, 1024).expect("run");
        canceller.join().expect("join");
        assert_eq!(output.interrupted, Some(Interrupted::Cancelled));
    }

    #[test]
    fn deadline_applies_while_child_ignores_stdin() {
        let input = vec![b'x'; 1 << 20];
        let deadline = Deadline::after(Duration::from_millis(300));
        let started = Instant::now();
        let output = run_command(sh("exec sleep 3"), Some(&input), &deadline, 1024).expect("run");
        assert_eq!(output.interrupted, Some(Interrupted::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn cancellation_applies_while_child_ignores_stdin() {
        let input = vec![b'x'; 1 << 20];
        let deadline = Deadline::after(Duration::from_secs(30));
        let handle = deadline.cancel_handle();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            handle.cancel();
        });
        let started = Instant::now();
        let output = run_command(sh("exec sleep 3"), Some(&input), &deadline, 1024).expect("run");
        canceller.join().expect("join");
        assert_eq!(output.interrupted, Some(Interrupted::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(command_from_argv(&[]).is_err());
    }
}
