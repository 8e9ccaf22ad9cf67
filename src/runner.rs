//! Command Runner — external commands in streaming or checked/captured mode.
//!
//! - Streaming: stdout/stderr are forwarded line by line as they arrive.
//!   The exit code is returned as-is; only a spawn failure is an error.
//! - Captured: output is buffered and a non-zero exit becomes
//!   `CommandError::Failed` carrying the captured text.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{command}' exited with code {exit_code}")]
    Failed {
        command: String,
        exit_code: i32,
        output: String,
    },
}

impl CommandError {
    /// Exit code of a command that ran; `None` when it never started
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Spawn { .. } => None,
            Self::Failed { exit_code, .. } => Some(*exit_code),
        }
    }

    /// Captured output (empty for spawn failures)
    pub fn output(&self) -> &str {
        match self {
            Self::Spawn { .. } => "",
            Self::Failed { output, .. } => output,
        }
    }
}

/// A command to run: program, arguments, working directory and env overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, OsString)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Build a tokio `Command` with stdio left to the caller
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }

    /// Program file name without its directory, for status lines
    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program_name())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Fully captured output of a command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr, for diagnostics
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    Stdout,
    Stderr,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Streaming mode: forward output live, block until exit, return the exit code.
    async fn stream(&self, spec: &CommandSpec) -> Result<i32, CommandError>;

    /// Checked mode: capture output; non-zero exit is an error.
    async fn capture(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

/// Runs real processes and echoes streamed lines to this process's stdout/stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn stream(&self, spec: &CommandSpec) -> Result<i32, CommandError> {
        stream_lines(spec, |source, line| match source {
            OutputSource::Stdout => println!("{}", line),
            OutputSource::Stderr => eprintln!("{}", line),
        })
        .await
    }

    async fn capture(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| CommandError::Spawn {
            program: spec.program_name(),
            source: e,
        })?;

        let captured = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!("'{}' exited with {}", spec, captured.exit_code);

        if output.status.success() {
            Ok(captured)
        } else {
            Err(CommandError::Failed {
                command: spec.to_string(),
                exit_code: captured.exit_code,
                output: captured.combined(),
            })
        }
    }
}

/// Spawn `spec` and hand every output line to `on_line` as soon as it is read.
/// stdout and stderr are read concurrently, so neither pipe can fill up and
/// stall the child.
pub async fn stream_lines<F>(spec: &CommandSpec, mut on_line: F) -> Result<i32, CommandError>
where
    F: FnMut(OutputSource, String) + Send,
{
    let mut cmd = spec.to_command();
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| CommandError::Spawn {
        program: spec.program_name(),
        source: e,
    })?;
    tracing::debug!("Started '{}' (pid {:?})", spec, child.id());

    let mut stdout = child.stdout.take().map(LossyLines::new);
    let mut stderr = child.stderr.take().map(LossyLines::new);

    let mut stdout_open = stdout.is_some();
    let mut stderr_open = stderr.is_some();

    while stdout_open || stderr_open {
        tokio::select! {
            line = next_line(&mut stdout), if stdout_open => match line {
                Some(line) => on_line(OutputSource::Stdout, line),
                None => stdout_open = false,
            },
            line = next_line(&mut stderr), if stderr_open => match line {
                Some(line) => on_line(OutputSource::Stderr, line),
                None => stderr_open = false,
            },
        }
    }

    let status = child.wait().await.map_err(|e| CommandError::Spawn {
        program: spec.program_name(),
        source: e,
    })?;
    let code = status.code().unwrap_or(-1);
    tracing::debug!("'{}' exited with {}", spec, code);
    Ok(code)
}

async fn next_line<R>(lines: &mut Option<LossyLines<R>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => None,
    }
}

/// Line reader over child output that never stops early on bad encoding.
///
/// Invalid UTF-8 is replaced with U+FFFD and reading continues to the real
/// EOF, so the child can never block on a pipe nobody drains.
/// `next_line` is cancel-safe: a partially read line stays buffered.
pub struct LossyLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LossyLines<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Next line without its `\n` / `\r\n`; `None` at EOF.
    pub async fn next_line(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(_) if self.buf.is_empty() => None,
            Ok(_) => {
                let mut line = std::mem::take(&mut self.buf);
                if line.last() == Some(&b'\n') {
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                }
                Some(String::from_utf8_lossy(&line).into_owned())
            }
            Err(e) => {
                tracing::debug!("Output pipe read failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_display_uses_file_name() {
        let spec = CommandSpec::new("/usr/local/bin/npm").args(["install", "--legacy-peer-deps"]);
        assert_eq!(spec.to_string(), "npm install --legacy-peer-deps");
    }

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            exit_code: 2,
            stdout: "src/a.ts(1,1): error TS2304\n".into(),
            stderr: "Found 1 error.\n".into(),
        };
        assert_eq!(out.combined(), "src/a.ts(1,1): error TS2304\nFound 1 error.");
        assert_eq!(CommandOutput::default().combined(), "");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-3f9a");
        let err = SystemRunner.capture(&spec).await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
        assert_eq!(err.exit_code(), None);

        let err = stream_lines(&spec, |_, _| {}).await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_forwards_both_pipes_and_returns_code() {
        let spec = CommandSpec::new("sh").args(["-c", "echo one; echo two 1>&2; echo three; exit 3"]);
        let mut seen = Vec::new();
        let code = stream_lines(&spec, |source, line| seen.push((source, line)))
            .await
            .unwrap();

        assert_eq!(code, 3);
        let stdout: Vec<_> = seen
            .iter()
            .filter(|(s, _)| *s == OutputSource::Stdout)
            .map(|(_, l)| l.as_str())
            .collect();
        assert_eq!(stdout, vec!["one", "three"]);
        assert!(seen.contains(&(OutputSource::Stderr, "two".to_string())));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_survives_invalid_utf8_and_drains_to_eof() {
        // 잘못된 바이트 뒤에 파이프 버퍼보다 큰 출력
        let spec = CommandSpec::new("sh").args([
            "-c",
            "printf '\\377\\n'; head -c 262144 /dev/zero | tr '\\0' a; echo; echo done",
        ]);
        let mut seen = Vec::new();
        let code = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            stream_lines(&spec, |_, line| seen.push(line)),
        )
        .await
        .expect("stream must not hang")
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(seen.first().map(String::as_str), Some("\u{FFFD}"));
        assert_eq!(seen.get(1).map(String::len), Some(262144));
        assert_eq!(seen.last().map(String::as_str), Some("done"));
    }

    #[tokio::test]
    async fn test_lossy_lines_strip_crlf_and_keep_last_partial_line() {
        let input: &[u8] = b"one\r\ntw\xffo\nlast";
        let mut lines = LossyLines::new(input);
        assert_eq!(lines.next_line().await.as_deref(), Some("one"));
        assert_eq!(lines.next_line().await.as_deref(), Some("tw\u{FFFD}o"));
        assert_eq!(lines.next_line().await.as_deref(), Some("last"));
        assert_eq!(lines.next_line().await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_nonzero_is_failed_with_output() {
        let spec = CommandSpec::new("sh").args(["-c", "echo 'error TS2322' ; exit 2"]);
        let err = SystemRunner.capture(&spec).await.unwrap_err();
        assert_eq!(err.exit_code(), Some(2));
        assert!(err.output().contains("error TS2322"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_success_and_env() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "printf %s \"$DEVSTART_GREETING\""])
            .env("DEVSTART_GREETING", "hello");
        let out = SystemRunner.capture(&spec).await.unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout, "hello");
    }
}
