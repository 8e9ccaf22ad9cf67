//! Supervised dev-server process — spawn, output forwarding, and
//! graceful-then-forced shutdown.
//!
//! The child runs in its own process group (Unix) / console process group
//! (Windows) so that termination reaches the whole tree (`npm` → `node`),
//! and a terminal Ctrl+C is delivered to devstart only, which then forwards it
//! as a graceful stop (SIGTERM / CTRL_BREAK).

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::runner::{CommandSpec, LossyLines, OutputSource};

/// How long to let output forwarders drain after the child exits
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Receives every line the server prints
pub type OutputSink = Arc<dyn Fn(OutputSource, String) + Send + Sync>;

pub fn stdio_sink() -> OutputSink {
    Arc::new(|source, line| match source {
        OutputSource::Stdout => println!("{}", line),
        OutputSource::Stderr => eprintln!("{}", line),
    })
}

/// How the supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited on its own with this code (`-1` when killed by a signal)
    Exited(i32),
    /// Stopped by a graceful termination request within the grace period
    Graceful,
    /// Grace period elapsed; forcibly killed
    Forced,
}

pub struct SupervisedProcess {
    child: Child,
    pub pid: u32,
    forwarders: Vec<JoinHandle<()>>,
}

impl SupervisedProcess {
    pub fn spawn(spec: &CommandSpec, sink: OutputSink) -> Result<Self> {
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(target_os = "windows")]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn '{}': {}", spec, e))?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("Failed to get PID of spawned process"))?;

        let mut forwarders = Vec::new();

        // ── stdout reader ────────────────────────────────────
        if let Some(stdout) = child.stdout.take() {
            let sink = sink.clone();
            forwarders.push(tokio::spawn(async move {
                let mut lines = LossyLines::new(stdout);
                while let Some(line) = lines.next_line().await {
                    sink(OutputSource::Stdout, line);
                }
            }));
        }

        // ── stderr reader ────────────────────────────────────
        if let Some(stderr) = child.stderr.take() {
            let sink = sink.clone();
            forwarders.push(tokio::spawn(async move {
                let mut lines = LossyLines::new(stderr);
                while let Some(line) = lines.next_line().await {
                    sink(OutputSource::Stderr, line);
                }
            }));
        }

        tracing::info!("Dev server started with PID {}", pid);
        Ok(Self {
            child,
            pid,
            forwarders,
        })
    }

    /// Block until the child exits or `cancel` fires; on cancel, shut down
    /// with `grace` before escalating.
    pub async fn supervise(&mut self, cancel: &CancellationToken, grace: Duration) -> ProcessExit {
        let exited = tokio::select! {
            status = self.child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let outcome = match exited {
            Some(Ok(status)) => ProcessExit::Exited(status.code().unwrap_or(-1)),
            Some(Err(e)) => {
                tracing::error!("Failed to wait for the dev server: {}", e);
                ProcessExit::Exited(-1)
            }
            None => self.shutdown(grace).await,
        };
        self.drain().await;
        outcome
    }

    /// Graceful stop, then forced kill once `grace` elapses.
    pub async fn shutdown(&mut self, grace: Duration) -> ProcessExit {
        if let Err(e) = self.request_stop() {
            tracing::debug!("Graceful stop request failed: {}", e);
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(_) => {
                tracing::info!("Dev server (pid {}) stopped gracefully", self.pid);
                ProcessExit::Graceful
            }
            Err(_) => {
                tracing::warn!(
                    "Dev server (pid {}) still running after {:?}, killing it",
                    self.pid,
                    grace
                );
                if let Err(e) = self.force_kill() {
                    tracing::warn!("Forced kill failed: {}", e);
                }
                if let Err(e) = self.child.wait().await {
                    tracing::debug!("Wait after kill failed: {}", e);
                }
                ProcessExit::Forced
            }
        }
    }

    /// SIGTERM to the process group (Unix) / CTRL_BREAK to the console
    /// process group, falling back to `taskkill /T` (Windows)
    fn request_stop(&self) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            killpg(Pid::from_raw(self.pid as i32), Signal::SIGTERM)
                .map_err(|e| anyhow::anyhow!("failed to send SIGTERM: {}", e))?;
        }

        #[cfg(target_os = "windows")]
        {
            use winapi::um::wincon::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};

            // CREATE_NEW_PROCESS_GROUP로 생성했으므로 그룹 ID == 자식 PID
            let sent = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, self.pid) };
            if sent != 0 {
                return Ok(());
            }
            tracing::debug!(
                "CTRL_BREAK to pid {} failed ({}), trying taskkill /T",
                self.pid,
                std::io::Error::last_os_error()
            );

            let mut cmd = std::process::Command::new("taskkill");
            cmd.args(["/T", "/PID", &self.pid.to_string()])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            crate::utils::apply_creation_flags(&mut cmd);
            let status = cmd.status()?;
            if !status.success() {
                anyhow::bail!("taskkill /T exited with {}", status);
            }
        }

        Ok(())
    }

    /// SIGKILL to the process group (Unix) / `taskkill /F /T` (Windows)
    fn force_kill(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            if let Err(e) = killpg(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
                tracing::debug!("killpg failed ({}), killing the direct child", e);
                self.child.start_kill()?;
            }
        }

        #[cfg(target_os = "windows")]
        {
            let mut cmd = std::process::Command::new("taskkill");
            cmd.args(["/F", "/T", "/PID", &self.pid.to_string()])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            crate::utils::apply_creation_flags(&mut cmd);
            if cmd.status().map(|s| !s.success()).unwrap_or(true) {
                self.child.start_kill()?;
            }
        }

        Ok(())
    }

    async fn drain(&mut self) {
        for handle in self.forwarders.drain(..) {
            let _ = tokio::time::timeout(DRAIN_TIMEOUT, handle).await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collecting_sink() -> (OutputSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let store = lines.clone();
        let sink: OutputSink = Arc::new(move |_: OutputSource, line: String| {
            store.lock().unwrap().push(line)
        });
        (sink, lines)
    }

    #[tokio::test]
    async fn test_normal_exit_reports_code_and_output() {
        let (sink, lines) = collecting_sink();
        let spec = CommandSpec::new("sh").args(["-c", "echo ready; exit 4"]);
        let mut proc = SupervisedProcess::spawn(&spec, sink).unwrap();

        let outcome = proc
            .supervise(&CancellationToken::new(), Duration::from_secs(5))
            .await;
        assert_eq!(outcome, ProcessExit::Exited(4));
        assert_eq!(*lines.lock().unwrap(), vec!["ready".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_does_not_kill_server() {
        let (sink, lines) = collecting_sink();
        let spec = CommandSpec::new("sh").args([
            "-c",
            "echo first; printf '\\377\\n'; sleep 0.3; echo after; exit 0",
        ]);
        let mut proc = SupervisedProcess::spawn(&spec, sink).unwrap();

        let outcome = proc
            .supervise(&CancellationToken::new(), Duration::from_secs(5))
            .await;
        assert_eq!(outcome, ProcessExit::Exited(0));
        assert_eq!(
            *lines.lock().unwrap(),
            vec!["first".to_string(), "\u{FFFD}".to_string(), "after".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_gracefully_within_grace() {
        let (sink, _) = collecting_sink();
        let spec = CommandSpec::new("sleep").arg("30");
        let mut proc = SupervisedProcess::spawn(&spec, sink).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = proc.supervise(&cancel, Duration::from_secs(5)).await;
        assert_eq!(outcome, ProcessExit::Graceful);
    }

    #[tokio::test]
    async fn test_cancel_escalates_when_term_is_ignored() {
        let (sink, _) = collecting_sink();
        // SIGTERM 무시 → 유예 시간 후 강제 종료
        let spec = CommandSpec::new("sh").args(["-c", "trap '' TERM; exec sleep 30"]);
        let mut proc = SupervisedProcess::spawn(&spec, sink).unwrap();
        // trap 설치 전에 신호가 도착하지 않도록 잠시 대기
        tokio::time::sleep(Duration::from_millis(200)).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        let outcome = proc.supervise(&cancel, Duration::from_millis(300)).await;

        assert_eq!(outcome, ProcessExit::Forced);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let (sink, _) = collecting_sink();
        let spec = CommandSpec::new("definitely-not-a-real-binary-3f9a");
        assert!(SupervisedProcess::spawn(&spec, sink).is_err());
    }
}
