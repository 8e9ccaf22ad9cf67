//! `devstart.toml` 설정 로딩
//!
//! 파일이 없으면 기본값을 사용하고, 파싱 실패는 `InvalidConfig`로 보고합니다.
//! 우선순위: CLI 플래그 > 환경변수(`DEVSTART_PORT`) > 설정 파일 > 기본값

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "devstart.toml";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DevConfig {
    /// Project root; relative paths below are resolved against it
    pub project_dir: PathBuf,
    pub port: u16,
    /// Value injected as `NODE_ENV`
    pub env_mode: String,
    pub grace_period_secs: u64,
    pub clean: CleanConfig,
    pub install: InstallConfig,
    pub build: BuildConfig,
    pub typecheck: TypecheckConfig,
    pub serve: ServeConfig,
    pub scaffold: ScaffoldConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CleanConfig {
    pub enabled: bool,
    pub dirs: Vec<String>,
    pub files: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct InstallConfig {
    /// Run `npm cache clean --force` before installing
    pub clean_cache: bool,
    pub args: Vec<String>,
    /// Appended to `args` for the single retry
    pub fallback_flag: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BuildConfig {
    pub enabled: bool,
    pub args: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TypecheckConfig {
    pub enabled: bool,
    pub args: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServeConfig {
    pub args: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ScaffoldConfig {
    pub dirs: Vec<String>,
    pub files: Vec<ScaffoldFile>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldFile {
    pub path: String,
    pub contents: String,
    /// `false` = placeholder, written only when the file is missing
    #[serde(default = "default_true")]
    pub overwrite: bool,
}

fn default_true() -> bool {
    true
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            port: DEFAULT_PORT,
            env_mode: "development".to_string(),
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            clean: CleanConfig::default(),
            install: InstallConfig::default(),
            build: BuildConfig::default(),
            typecheck: TypecheckConfig::default(),
            serve: ServeConfig::default(),
            scaffold: ScaffoldConfig::default(),
        }
    }
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dirs: args(&["node_modules", ".next", ".cache", "dist", "build"]),
            files: args(&["yarn.lock", "package-lock.json", "pnpm-lock.yaml"]),
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            clean_cache: true,
            args: args(&["install"]),
            fallback_flag: "--legacy-peer-deps".to_string(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            args: args(&["run", "build"]),
        }
    }
}

impl Default for TypecheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            args: args(&["exec", "--", "tsc", "--noEmit"]),
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            args: args(&["run", "dev"]),
        }
    }
}

impl DevConfig {
    /// Load config from an explicit path or `<project_dir>/devstart.toml`.
    /// A missing file yields the defaults.
    pub fn load(explicit: Option<&Path>, project_dir: &Path) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project_dir.join(DEFAULT_CONFIG_FILE));

        let mut cfg = if path.exists() {
            let s = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let cfg = Self::from_toml(&s)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            tracing::debug!("Loaded config from {}", path.display());
            cfg
        } else {
            if explicit.is_some() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            Self::default()
        };

        if cfg.project_dir.is_relative() {
            cfg.project_dir = project_dir.join(&cfg.project_dir);
        }
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("DEVSTART_PORT") {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("DEVSTART_PORT is not a valid port: {}", port))?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be between 1 and 65535");
        }
        if self.serve.args.is_empty() {
            anyhow::bail!("[serve] args must not be empty");
        }
        if self.install.args.is_empty() {
            anyhow::bail!("[install] args must not be empty");
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Resolve a project-relative path
    pub fn project_path(&self, rel: &str) -> PathBuf {
        self.project_dir.join(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = DevConfig::default();
        assert_eq!(cfg.port, 3001);
        assert_eq!(cfg.env_mode, "development");
        assert_eq!(cfg.grace_period(), Duration::from_secs(5));
        assert!(cfg.clean.dirs.contains(&"node_modules".to_string()));
        assert!(cfg.clean.files.contains(&"package-lock.json".to_string()));
        assert_eq!(cfg.install.fallback_flag, "--legacy-peer-deps");
        assert!(!cfg.build.enabled);
        assert!(cfg.typecheck.enabled);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = DevConfig::from_toml(
            r#"
            port = 4000

            [typecheck]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.port, 4000);
        assert!(!cfg.typecheck.enabled);
        // 지정하지 않은 테이블 내부 값도 기본값 유지
        assert_eq!(cfg.typecheck.args, vec!["exec", "--", "tsc", "--noEmit"]);
        assert_eq!(cfg.serve.args, vec!["run", "dev"]);
    }

    #[test]
    fn test_scaffold_files_default_overwrite() {
        let cfg = DevConfig::from_toml(
            r#"
            [[scaffold.files]]
            path = "next.config.js"
            contents = "module.exports = {}"

            [[scaffold.files]]
            path = "src/app/page.tsx"
            contents = "export default function Page() { return null }"
            overwrite = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.scaffold.files.len(), 2);
        assert!(cfg.scaffold.files[0].overwrite);
        assert!(!cfg.scaffold.files[1].overwrite);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(DevConfig::from_toml("port = 0").is_err());
        assert!(DevConfig::from_toml("port = \"abc\"").is_err());
        assert!(DevConfig::from_toml("[serve]\nargs = []").is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DevConfig::load(None, dir.path()).unwrap();
        assert_eq!(cfg.project_dir, dir.path().join("."));
        assert_eq!(cfg.serve.args, vec!["run", "dev"]);
    }

    #[test]
    fn test_load_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(DevConfig::load(Some(&missing), dir.path()).is_err());
    }

    #[test]
    fn test_load_reads_project_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "env_mode = \"test\"\ngrace_period_secs = 2\n",
        )
        .unwrap();
        let cfg = DevConfig::load(None, dir.path()).unwrap();
        assert_eq!(cfg.env_mode, "test");
        assert_eq!(cfg.grace_period(), Duration::from_secs(2));
    }
}
