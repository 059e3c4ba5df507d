use std::{
    io::Read,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};

use crate::config::DEFAULT_MAX_CAPTURE_BYTES;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const READER_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl RunOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0 && !self.timed_out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub max_capture_bytes: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Execute a program and capture stdout/stderr.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or the I/O streams cannot
/// be read entirely.
pub fn run_command(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
) -> Result<RunOutput> {
    run_command_with_options(program, args, envs, cwd, RunOptions::default())
}

/// Execute a program, killing it once `options.timeout` elapses.
///
/// A killed program reports `timed_out = true` and exit code `-1`.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or waited on.
pub fn run_command_with_options(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
    options: RunOptions,
) -> Result<RunOutput> {
    let mut command = configured_command(program, args, envs, cwd);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("stdout missing for {program}"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("stderr missing for {program}"))?;

    let limit = options.max_capture_bytes;
    let (tx, rx) = mpsc::channel();
    let stdout_tx = tx.clone();
    thread::spawn(move || {
        let _ = stdout_tx.send((Stream::Stdout, read_to_string_limited(stdout, limit)));
    });
    thread::spawn(move || {
        let _ = tx.send((Stream::Stderr, read_to_string_limited(stderr, limit)));
    });

    let (status, timed_out) = wait_with_deadline(&mut child, program, options.timeout)?;
    let code = if timed_out {
        -1
    } else {
        status.code().unwrap_or(-1)
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    for _ in 0..2 {
        // A killed program can leave descendants holding the pipes open.
        let received = if timed_out {
            match rx.recv_timeout(READER_GRACE) {
                Ok(value) => value,
                Err(_) => break,
            }
        } else {
            rx.recv()
                .map_err(|_| anyhow::anyhow!("output reader for {program} disconnected"))?
        };
        let (stream, result) = received;
        let (mut text, truncated) = result?;
        if truncated {
            text.push_str("\n[...truncated...]\n");
        }
        match stream {
            Stream::Stdout => stdout = text,
            Stream::Stderr => stderr = text,
        }
    }

    Ok(RunOutput {
        code,
        stdout,
        stderr,
        timed_out,
    })
}

fn wait_with_deadline(
    child: &mut Child,
    program: &str,
    timeout: Option<Duration>,
) -> Result<(ExitStatus, bool)> {
    let Some(timeout) = timeout else {
        let status = child
            .wait()
            .with_context(|| format!("failed to wait for {program}"))?;
        return Ok((status, false));
    };
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("failed to poll {program}"))?
        {
            return Ok((status, false));
        }
        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(
                program,
                timeout_secs = timeout.as_secs_f64(),
                "killing program after timeout"
            );
            let _ = child.kill();
            let status = child
                .wait()
                .with_context(|| format!("failed to reap {program}"))?;
            return Ok((status, true));
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn configured_command(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
) -> Command {
    let mut command = Command::new(program);
    command.args(args);
    for (key, value) in envs {
        command.env(key, value);
    }
    command.current_dir(cwd);
    command
}

fn read_to_string_limited(mut reader: impl Read, limit: usize) -> Result<(String, bool)> {
    let mut buffer = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        append_limited(&mut buffer, &chunk[..read], limit, &mut truncated);
    }
    Ok((String::from_utf8_lossy(&buffer).to_string(), truncated))
}

// Keeps the newest `limit` bytes.
fn append_limited(buffer: &mut Vec<u8>, chunk: &[u8], limit: usize, truncated: &mut bool) {
    if limit == 0 {
        return;
    }
    if buffer.len().saturating_add(chunk.len()) <= limit {
        buffer.extend_from_slice(chunk);
        return;
    }
    *truncated = true;
    let old_len = buffer.len();
    let excess = old_len.saturating_add(chunk.len()).saturating_sub(limit);
    if excess >= old_len {
        buffer.clear();
        let drop_from_chunk = excess.saturating_sub(old_len).min(chunk.len());
        buffer.extend_from_slice(&chunk[drop_from_chunk..]);
    } else {
        buffer.drain(0..excess);
        buffer.extend_from_slice(chunk);
    }
}

/// Last `count` non-empty lines of captured output.
#[must_use]
pub fn tail_lines(text: &str, count: usize) -> String {
    let lines = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
