//! Supervisor 전용 에러 타입 — 치명적 단계 실패를 구분하여 종료 코드와
//! 안내 문구를 결정합니다.
//!
//! 정리 실패(`CleanupError`)와 타입 체크 실패는 치명적이지 않으므로 여기에
//! 없습니다. 인터럽트 종료 역시 에러가 아닌 `RunOutcome`입니다.

use std::path::PathBuf;

use crate::runner::CommandError;
use crate::toolchain::INSTALL_GUIDANCE;

#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Node.js toolchain not found")]
    ToolchainNotFound,

    #[error("Scaffolding failed: {0:#}")]
    Scaffold(anyhow::Error),

    #[error("Dependency install failed (exit code {exit_code}) even with {fallback_flag}")]
    Install { exit_code: i32, fallback_flag: String },

    #[error("Build failed (exit code {0})")]
    Build(i32),

    #[error("Failed to start the dev server: {0}")]
    Spawn(String),

    #[error("A dev server (pid {0}) is already running")]
    AlreadyRunning(u32),

    #[error("Dev server exited with code {0}")]
    ServerExited(i32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Command(#[from] CommandError),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

/// 정리 단계의 경로별 실패 — 기록만 하고 나머지 경로는 계속 진행
#[derive(thiserror::Error, Debug)]
#[error("failed to remove {}: {source}", .path.display())]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl SupervisorError {
    /// Process exit code for this failure. Every fatal error maps to 1.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// 사용자에게 보여줄 조치 안내
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::ToolchainNotFound => Some(INSTALL_GUIDANCE.to_string()),
            Self::Install { .. } => Some(
                "Check the npm output above for the failing package. Deleting \
                 node_modules and the lockfile, or running `npm install` by hand, \
                 usually shows the root cause."
                    .to_string(),
            ),
            Self::Build(_) => Some("Fix the build errors above and run devstart again.".to_string()),
            Self::Scaffold(_) => Some(
                "Make sure the project directory is writable and no file blocks a \
                 scaffolded directory."
                    .to_string(),
            ),
            Self::Spawn(_) => Some(
                "Verify that `npm run dev` works in the project directory.".to_string(),
            ),
            Self::InvalidConfig(_) => Some(format!(
                "Fix {} or remove it to use the defaults.",
                crate::config::DEFAULT_CONFIG_FILE
            )),
            _ => None,
        }
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ToolchainNotFound => "TOOLCHAIN_NOT_FOUND",
            Self::Scaffold(_) => "SCAFFOLD_FAILED",
            Self::Install { .. } => "INSTALL_FAILED",
            Self::Build(_) => "BUILD_FAILED",
            Self::Spawn(_) => "SPAWN_FAILED",
            Self::AlreadyRunning(_) => "ALREADY_RUNNING",
            Self::ServerExited(_) => "SERVER_EXITED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Command(_) => "COMMAND_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_fatal_errors_exit_with_one() {
        let errors = [
            SupervisorError::ToolchainNotFound,
            SupervisorError::Install {
                exit_code: 1,
                fallback_flag: "--legacy-peer-deps".into(),
            },
            SupervisorError::Spawn("boom".into()),
            SupervisorError::ServerExited(2),
        ];
        for e in &errors {
            assert_eq!(e.exit_code(), 1, "{}", e.error_code());
        }
    }

    #[test]
    fn test_toolchain_remediation_mentions_nodejs_org() {
        let text = SupervisorError::ToolchainNotFound.remediation().unwrap();
        assert!(text.contains("nodejs.org"));
    }

    #[test]
    fn test_install_message_names_fallback_flag() {
        let e = SupervisorError::Install {
            exit_code: 1,
            fallback_flag: "--legacy-peer-deps".into(),
        };
        assert!(e.to_string().contains("--legacy-peer-deps"));
        assert_eq!(e.error_code(), "INSTALL_FAILED");
    }
}
