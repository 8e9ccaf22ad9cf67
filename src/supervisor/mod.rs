//! Dev Server Supervisor — 부트스트랩 단계를 순서대로 실행하고 dev 서버를 소유합니다.
//!
//! ```text
//! Locate → Clean → Scaffold → Install → [Build] → [Typecheck] → ReapPort → SpawnServer → Wait/Terminate
//! ```
//!
//! - 각 단계는 진입 시 상태 줄, 완료 시 ✓/✗ 표시를 출력합니다.
//! - 재시도/프롬프트/중단 결정은 이 모듈에서만 내립니다. 하위 에러는 그대로 전달됩니다.
//! - 인터럽트는 Wait/Terminate 단계에서만 관찰합니다.

pub mod error;
pub mod process;
pub mod prompt;
pub mod state_machine;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::DevConfig;
use crate::process_monitor::{PortReaper, ProcessTable, SystemProcessTable};
use crate::runner::{CommandRunner, CommandSpec, SystemRunner};
use crate::scaffold::{Scaffolder, TemplateScaffolder};
use crate::toolchain::{Locator, ToolchainPath};
use crate::utils::path_with_prefix;

pub use error::{CleanupError, SupervisorError};
pub use process::{OutputSink, ProcessExit, SupervisedProcess};
pub use prompt::{AssumeYes, Confirm, TerminalConfirm};
pub use state_machine::{Stage, StateMachine};

const TYPECHECK_QUESTION: &str = "Type check failed. Continue anyway?";

/// How a run ended without a fatal error. Every variant exits with status 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Interrupted while serving; `forced` if the grace period ran out
    Interrupted { forced: bool },
    /// Operator declined to continue after a failed typecheck
    Declined,
    /// The dev server exited on its own with status 0
    ServerStopped,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        0
    }
}

/// Result of the clean stage
#[derive(Debug, Default)]
pub struct CleanReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<CleanupError>,
}

pub struct Supervisor {
    config: DevConfig,
    locator: Arc<Locator>,
    runner: Arc<dyn CommandRunner>,
    reaper: Arc<PortReaper<Box<dyn ProcessTable>>>,
    scaffolder: Box<dyn Scaffolder>,
    confirm: Arc<dyn Confirm>,
    sink: OutputSink,
    interrupt: Option<CancellationToken>,
    state: StateMachine,
    toolchain: Option<ToolchainPath>,
    server: Option<SupervisedProcess>,
}

impl Supervisor {
    /// Supervisor wired to the real system: PATH/registry lookup, real
    /// processes, terminal prompt and Ctrl+C.
    pub fn new(config: DevConfig) -> Self {
        let scaffolder = TemplateScaffolder::from_config(&config.scaffold);
        Self {
            config,
            locator: Arc::new(Locator::system()),
            runner: Arc::new(SystemRunner),
            reaper: Arc::new(PortReaper::new(Box::new(SystemProcessTable::new()))),
            scaffolder: Box::new(scaffolder),
            confirm: Arc::new(TerminalConfirm),
            sink: process::stdio_sink(),
            interrupt: None,
            state: StateMachine::new(),
            toolchain: None,
            server: None,
        }
    }

    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locator = Arc::new(locator);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_process_table(mut self, table: Box<dyn ProcessTable>) -> Self {
        self.reaper = Arc::new(PortReaper::new(table));
        self
    }

    pub fn with_scaffolder(mut self, scaffolder: Box<dyn Scaffolder>) -> Self {
        self.scaffolder = scaffolder;
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_output(mut self, sink: OutputSink) -> Self {
        self.sink = sink;
        self
    }

    /// Use an externally controlled token instead of listening for Ctrl+C
    pub fn with_interrupt(mut self, token: CancellationToken) -> Self {
        self.interrupt = Some(token);
        self
    }

    pub fn stage(&self) -> Stage {
        self.state.stage
    }

    /// Stages entered so far, in order
    pub fn stages_entered(&self) -> &[Stage] {
        &self.state.history
    }

    pub fn toolchain(&self) -> Option<&ToolchainPath> {
        self.toolchain.as_ref()
    }

    /// Run every stage in order and own the dev server until it stops.
    pub async fn run(&mut self) -> Result<RunOutcome, SupervisorError> {
        let result = self.run_stages().await;
        if let Err(e) = &result {
            println!("✗ {} failed: {}", self.state.stage, e);
        }
        let finished = self.enter(Stage::Finished);
        let outcome = result?;
        finished?;
        Ok(outcome)
    }

    async fn run_stages(&mut self) -> Result<RunOutcome, SupervisorError> {
        println!("🚀 Starting project cleanup and rebuild...");

        let toolchain = self.locate().await?;

        if self.config.clean.enabled {
            self.clean()?;
        }

        self.scaffold()?;
        self.install(&toolchain).await?;

        if self.config.build.enabled {
            self.build(&toolchain).await?;
        }

        if self.config.typecheck.enabled && !self.typecheck(&toolchain).await? {
            println!("\nStopping before the dev server starts.");
            return Ok(RunOutcome::Declined);
        }

        println!("\n✨ Project cleanup and rebuild complete!");

        self.reap_port().await?;
        self.spawn_server(&toolchain)?;
        self.serve().await
    }

    // ── Stages ───────────────────────────────────────────────

    async fn locate(&mut self) -> Result<ToolchainPath, SupervisorError> {
        self.enter(Stage::Locate)?;
        println!("\n🔍 Locating Node.js toolchain...");

        let toolchain = self
            .locator
            .clone()
            .locate_async()
            .await
            .ok_or(SupervisorError::ToolchainNotFound)?;

        let version = CommandSpec::new(&toolchain.node).arg("--version");
        match self.runner.capture(&version).await {
            Ok(out) => println!(
                "✓ node {} ({}, via {})",
                out.stdout.trim(),
                toolchain.bin_dir().display(),
                toolchain.found_by
            ),
            Err(e) => {
                tracing::warn!("Could not query node version: {}", e);
                println!("✓ {} (via {})", toolchain.bin_dir().display(), toolchain.found_by);
            }
        }

        self.toolchain = Some(toolchain.clone());
        Ok(toolchain)
    }

    /// Remove build artifacts. Missing paths are skipped; a failure on one
    /// path is reported and the rest are still attempted.
    pub fn clean(&mut self) -> Result<CleanReport, SupervisorError> {
        self.enter(Stage::Clean)?;
        println!("\n🧹 Cleaning project...");

        let targets: Vec<PathBuf> = self
            .config
            .clean
            .dirs
            .iter()
            .chain(self.config.clean.files.iter())
            .map(|p| self.config.project_path(p))
            .collect();

        let mut report = CleanReport::default();
        for path in targets {
            match remove_path(&path) {
                Ok(true) => {
                    println!("Removed {}", path.display());
                    report.removed.push(path);
                }
                Ok(false) => {}
                Err(source) => {
                    let err = CleanupError { path, source };
                    tracing::warn!("{}", err);
                    println!("✗ {}", err);
                    report.failed.push(err);
                }
            }
        }

        if report.failed.is_empty() {
            println!("✓ Clean complete ({} removed)", report.removed.len());
        } else {
            println!(
                "✗ Clean finished with {} failure(s), continuing",
                report.failed.len()
            );
        }
        Ok(report)
    }

    fn scaffold(&mut self) -> Result<(), SupervisorError> {
        self.enter(Stage::Scaffold)?;
        println!("\n🏗️ Scaffolding project files...");

        let report = self
            .scaffolder
            .scaffold(&self.config.project_dir)
            .map_err(SupervisorError::Scaffold)?;
        println!(
            "✓ Scaffold complete ({} written, {} unchanged)",
            report.written.len(),
            report.unchanged.len()
        );
        Ok(())
    }

    async fn install(&mut self, toolchain: &ToolchainPath) -> Result<(), SupervisorError> {
        self.enter(Stage::Install)?;
        println!("\n📦 Installing dependencies...");

        if self.config.install.clean_cache {
            let spec = self.npm(toolchain, ["cache", "clean", "--force"]);
            match self.runner.stream(&spec).await {
                Ok(0) => {}
                Ok(code) => tracing::warn!("'{}' exited with {}, continuing", spec, code),
                Err(e) => tracing::warn!("{}, continuing", e),
            }
        }

        println!("Attempting normal install...");
        let primary = self.npm(toolchain, self.config.install.args.clone());
        if self.runner.stream(&primary).await? == 0 {
            println!("✓ Dependencies installed");
            return Ok(());
        }

        let flag = self.config.install.fallback_flag.clone();
        println!("\nNormal install failed, trying with {}...", flag);
        let relaxed = primary.arg(flag.clone());
        let code = self.runner.stream(&relaxed).await?;
        if code != 0 {
            return Err(SupervisorError::Install {
                exit_code: code,
                fallback_flag: flag,
            });
        }

        println!("✓ Dependencies installed with {}", flag);
        Ok(())
    }

    async fn build(&mut self, toolchain: &ToolchainPath) -> Result<(), SupervisorError> {
        self.enter(Stage::Build)?;
        println!("\n🔨 Building project...");

        let spec = self.npm(toolchain, self.config.build.args.clone());
        let code = self.runner.stream(&spec).await?;
        if code != 0 {
            return Err(SupervisorError::Build(code));
        }
        println!("✓ Build complete");
        Ok(())
    }

    /// `true` to continue, `false` if the operator declined after a failure.
    async fn typecheck(&mut self, toolchain: &ToolchainPath) -> Result<bool, SupervisorError> {
        self.enter(Stage::Typecheck)?;
        println!("\n🔎 Type checking...");

        let spec = self.npm(toolchain, self.config.typecheck.args.clone());
        let err = match self.runner.capture(&spec).await {
            Ok(_) => {
                println!("✓ No type errors");
                return Ok(true);
            }
            Err(e) => e,
        };

        println!("✗ {}", err);
        if !err.output().is_empty() {
            println!("{}", err.output());
        }

        let confirm = self.confirm.clone();
        let proceed = tokio::task::spawn_blocking(move || confirm.confirm(TYPECHECK_QUESTION))
            .await
            .unwrap_or(false);
        if proceed {
            tracing::info!("Continuing despite type errors");
        }
        Ok(proceed)
    }

    async fn reap_port(&mut self) -> Result<(), SupervisorError> {
        self.enter(Stage::ReapPort)?;
        let port = self.config.port;
        println!("\n🔌 Freeing port {}...", port);

        if self.reaper.clone().free_port_async(port).await {
            println!("✓ Stopped the process that held port {}", port);
        } else {
            println!("✓ Port {} is free", port);
        }
        Ok(())
    }

    fn spawn_server(&mut self, toolchain: &ToolchainPath) -> Result<(), SupervisorError> {
        if let Some(existing) = &self.server {
            return Err(SupervisorError::AlreadyRunning(existing.pid));
        }
        self.enter(Stage::SpawnServer)?;
        println!("\n🚀 Starting development server...");

        let spec = self
            .npm(toolchain, self.config.serve.args.clone())
            .env("PORT", self.config.port.to_string())
            .env("NODE_ENV", self.config.env_mode.clone());

        let server = SupervisedProcess::spawn(&spec, self.sink.clone())
            .map_err(|e| SupervisorError::Spawn(e.to_string()))?;
        println!(
            "✓ {} running on http://localhost:{} (pid {}), press Ctrl+C to stop",
            spec, self.config.port, server.pid
        );
        self.server = Some(server);
        Ok(())
    }

    async fn serve(&mut self) -> Result<RunOutcome, SupervisorError> {
        self.enter(Stage::Serving)?;
        let token = match &self.interrupt {
            Some(token) => token.clone(),
            None => arm_interrupt(),
        };
        let grace = self.config.grace_period();

        let Some(mut server) = self.server.take() else {
            return Err(SupervisorError::Spawn("no dev server to supervise".to_string()));
        };
        let exit = server.supervise(&token, grace).await;

        match exit {
            ProcessExit::Exited(0) => {
                println!("\nDev server stopped.");
                Ok(RunOutcome::ServerStopped)
            }
            ProcessExit::Exited(code) => Err(SupervisorError::ServerExited(code)),
            ProcessExit::Graceful => {
                println!("\n👋 Server shut down.");
                Ok(RunOutcome::Interrupted { forced: false })
            }
            ProcessExit::Forced => {
                println!(
                    "\n👋 Server did not stop within {}s and was killed.",
                    grace.as_secs()
                );
                Ok(RunOutcome::Interrupted { forced: true })
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────

    /// npm command in the project dir, with the toolchain first on PATH
    fn npm<I, S>(&self, toolchain: &ToolchainPath, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&toolchain.npm)
            .args(args)
            .current_dir(&self.config.project_dir)
            .env("PATH", path_with_prefix(toolchain.bin_dir()))
    }

    fn enter(&mut self, stage: Stage) -> Result<(), SupervisorError> {
        self.state
            .transition(stage)
            .map_err(|e| SupervisorError::Internal(e.into()))
    }
}

/// Remove a file or directory tree. `Ok(false)` if it did not exist.
fn remove_path(path: &Path) -> std::io::Result<bool> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }
    Ok(true)
}

/// Ctrl+C (and SIGTERM on Unix) 수신 시 취소되는 토큰.
/// 서버 기동 직전에만 설치하므로, 이전 단계에서는 기본 신호 동작이 유지됩니다.
fn arm_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("Cannot listen for SIGTERM: {}", e);
                    tokio::signal::ctrl_c().await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
        }

        tracing::info!("Shutdown signal received, stopping dev server...");
        println!("\n👋 Shutting down server...");
        trigger.cancel();
    });

    token
}
