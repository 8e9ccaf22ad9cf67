//! Node.js 툴체인 탐색기 — `node`와 `npm`이 함께 있는 디렉토리를 찾습니다.
//!
//! ## 탐색 순서 (첫 성공에서 중단)
//! 1. 플랫폼 레지스트리 (Windows: `HKLM\SOFTWARE\Node.js` → `InstallPath`)
//! 2. 알려진 설치 디렉토리 (공식 설치 경로, Homebrew, Volta, nvm 등)
//! 3. `PATH`의 각 디렉토리
//!
//! 후보 디렉토리는 `node`와 `npm` 실행 파일이 **둘 다** 있어야 채택됩니다.
//! 탐색은 시스템 상태를 바꾸지 않으며, 결과는 실행 중 한 번만 계산됩니다.
//!
//! 레지스트리 조회는 `winreg`(Windows 전용), 경로 패턴은 `glob` 사용.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(not(target_os = "windows"))]
use glob::glob;

use crate::utils::{node_exe_name, npm_exe_name};

#[cfg(target_os = "windows")]
const REGISTRY_SUBKEY: &str = r"SOFTWARE\Node.js";
#[cfg(target_os = "windows")]
const REGISTRY_VALUE: &str = "InstallPath";

pub const INSTALL_GUIDANCE: &str = "Node.js (with npm) was not found.\n\
    Install the LTS release from https://nodejs.org/en/download and make sure\n\
    `node` and `npm` are on your PATH, then run devstart again.\n\
    Alternatives: `winget install OpenJS.NodeJS.LTS` (Windows),\n\
    `brew install node` (macOS), or a version manager such as nvm or Volta.";

/// 툴체인을 찾아낸 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Registry,
    KnownDir,
    SearchPath,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::Registry => "registry",
            Strategy::KnownDir => "known install directory",
            Strategy::SearchPath => "PATH",
        };
        f.write_str(s)
    }
}

/// 같은 디렉토리에서 발견된 `node` + `npm` 경로 쌍
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainPath {
    pub node: PathBuf,
    pub npm: PathBuf,
    pub found_by: Strategy,
}

impl ToolchainPath {
    /// Directory holding both executables
    pub fn bin_dir(&self) -> &Path {
        self.node.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Read-only lookup of the Node.js install root. `None` is a normal outcome.
pub trait RegistryQuery: Send + Sync {
    fn install_root(&self) -> Option<PathBuf>;
}

/// Windows에서는 `HKLM\SOFTWARE\Node.js`, 그 외 플랫폼에서는 항상 `None`
pub struct SystemRegistry;

impl RegistryQuery for SystemRegistry {
    #[cfg(target_os = "windows")]
    fn install_root(&self) -> Option<PathBuf> {
        use winreg::enums::HKEY_LOCAL_MACHINE;
        use winreg::RegKey;

        read_install_path(&RegKey::predef(HKEY_LOCAL_MACHINE), REGISTRY_SUBKEY)
    }

    #[cfg(not(target_os = "windows"))]
    fn install_root(&self) -> Option<PathBuf> {
        None
    }
}

/// `InstallPath` (REG_SZ 또는 REG_EXPAND_SZ) 값을 읽습니다.
#[cfg(target_os = "windows")]
fn read_install_path(root: &winreg::RegKey, subkey: &str) -> Option<PathBuf> {
    match root
        .open_subkey(subkey)
        .and_then(|key| key.get_value::<String, _>(REGISTRY_VALUE))
    {
        Ok(value) => install_root_from(&value),
        Err(e) => {
            tracing::debug!("Registry value {}\\{} unavailable: {}", subkey, REGISTRY_VALUE, e);
            None
        }
    }
}

/// 빈 값은 "설치 경로 없음"
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn install_root_from(value: &str) -> Option<PathBuf> {
    let value = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Locator
// ═══════════════════════════════════════════════════════════════

pub struct Locator {
    registry: Box<dyn RegistryQuery>,
    known_dirs: Vec<PathBuf>,
    search_path: Vec<PathBuf>,
}

impl Locator {
    pub fn new(
        registry: Box<dyn RegistryQuery>,
        known_dirs: Vec<PathBuf>,
        search_path: Vec<PathBuf>,
    ) -> Self {
        Self {
            registry,
            known_dirs,
            search_path,
        }
    }

    /// Locator wired to the real registry, conventional dirs and `$PATH`
    pub fn system() -> Self {
        let search_path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self::new(Box::new(SystemRegistry), default_known_dirs(), search_path)
    }

    /// 세 전략을 순서대로 시도하고 첫 성공을 반환합니다.
    pub fn locate(&self) -> Option<ToolchainPath> {
        let found = self
            .probe_registry()
            .or_else(|| self.probe_known_dirs())
            .or_else(|| self.probe_search_path());

        match &found {
            Some(tc) => tracing::info!(
                "Node.js toolchain found via {}: {}",
                tc.found_by,
                tc.bin_dir().display()
            ),
            None => tracing::warn!("Node.js toolchain not found by any strategy"),
        }
        found
    }

    /// `locate`의 비동기 래퍼 — 파일시스템/레지스트리 조회를 블로킹 풀에서 실행
    pub async fn locate_async(self: Arc<Self>) -> Option<ToolchainPath> {
        tokio::task::spawn_blocking(move || self.locate())
            .await
            .unwrap_or(None)
    }

    fn probe_registry(&self) -> Option<ToolchainPath> {
        tracing::info!("Checking registry for a Node.js install root...");
        match self.registry.install_root() {
            Some(root) => {
                tracing::debug!("Registry reports install root {}", root.display());
                let found = check_dir(&root, Strategy::Registry);
                if found.is_none() {
                    tracing::debug!("Registry root {} lacks node/npm", root.display());
                }
                found
            }
            None => {
                tracing::debug!("No registry entry");
                None
            }
        }
    }

    fn probe_known_dirs(&self) -> Option<ToolchainPath> {
        tracing::info!(
            "Probing {} known install directories...",
            self.known_dirs.len()
        );
        self.known_dirs
            .iter()
            .find_map(|dir| check_dir(dir, Strategy::KnownDir))
    }

    fn probe_search_path(&self) -> Option<ToolchainPath> {
        tracing::info!("Scanning {} PATH entries...", self.search_path.len());
        self.search_path
            .iter()
            .find_map(|dir| check_dir(dir, Strategy::SearchPath))
    }
}

/// 디렉토리에 node와 npm이 모두 있으면 채택
fn check_dir(dir: &Path, found_by: Strategy) -> Option<ToolchainPath> {
    let node = dir.join(node_exe_name());
    let npm = dir.join(npm_exe_name());
    if node.is_file() && npm.is_file() {
        tracing::debug!("Accepted {}", dir.display());
        Some(ToolchainPath { node, npm, found_by })
    } else {
        tracing::trace!("Rejected {}", dir.display());
        None
    }
}

/// 플랫폼별 관례적 설치 디렉토리 (우선순위 순)
pub fn default_known_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    #[cfg(target_os = "windows")]
    {
        if let Some(pf) = std::env::var_os("ProgramFiles") {
            dirs.push(PathBuf::from(pf).join("nodejs"));
        }
        if let Some(pf86) = std::env::var_os("ProgramFiles(x86)") {
            dirs.push(PathBuf::from(pf86).join("nodejs"));
        }
        if let Some(local) = std::env::var_os("LOCALAPPDATA") {
            dirs.push(PathBuf::from(local).join("Programs").join("nodejs"));
        }
        // nvm-windows 심볼릭 링크
        if let Some(appdata) = std::env::var_os("APPDATA") {
            dirs.push(PathBuf::from(appdata).join("nvm").join("nodejs"));
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        dirs.push(PathBuf::from("/usr/local/bin"));
        dirs.push(PathBuf::from("/usr/bin"));
        dirs.push(PathBuf::from("/opt/homebrew/bin"));

        if let Some(home) = std::env::var_os("HOME") {
            let home = PathBuf::from(home);
            dirs.push(home.join(".volta").join("bin"));

            // nvm: ~/.nvm/versions/node/v*/bin
            let pattern = home
                .join(".nvm")
                .join("versions")
                .join("node")
                .join("*")
                .join("bin");
            if let Ok(paths) = glob(&pattern.to_string_lossy()) {
                dirs.extend(paths.flatten().filter(|p| p.is_dir()));
            }

            dirs.push(home.join(".local").join("bin"));
        }
    }

    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FixedRegistry(Option<PathBuf>);

    impl RegistryQuery for FixedRegistry {
        fn install_root(&self) -> Option<PathBuf> {
            self.0.clone()
        }
    }

    fn toolchain_dir(with_npm: bool) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(node_exe_name()), b"").unwrap();
        if with_npm {
            std::fs::write(dir.path().join(npm_exe_name()), b"").unwrap();
        }
        dir
    }

    #[test]
    fn test_registry_takes_precedence() {
        let reg = toolchain_dir(true);
        let known = toolchain_dir(true);
        let path = toolchain_dir(true);

        let locator = Locator::new(
            Box::new(FixedRegistry(Some(reg.path().to_path_buf()))),
            vec![known.path().to_path_buf()],
            vec![path.path().to_path_buf()],
        );
        let tc = locator.locate().unwrap();
        assert_eq!(tc.found_by, Strategy::Registry);
        assert_eq!(tc.bin_dir(), reg.path());
    }

    #[test]
    fn test_known_dir_beats_search_path() {
        let known = toolchain_dir(true);
        let path = toolchain_dir(true);

        let locator = Locator::new(
            Box::new(FixedRegistry(None)),
            vec![known.path().to_path_buf()],
            vec![path.path().to_path_buf()],
        );
        let tc = locator.locate().unwrap();
        assert_eq!(tc.found_by, Strategy::KnownDir);
        assert_eq!(tc.node, known.path().join(node_exe_name()));
        assert_eq!(tc.npm, known.path().join(npm_exe_name()));
    }

    #[test]
    fn test_search_path_fallback_in_order() {
        let empty = tempfile::tempdir().unwrap();
        let first = toolchain_dir(true);
        let second = toolchain_dir(true);

        let locator = Locator::new(
            Box::new(FixedRegistry(None)),
            vec![empty.path().to_path_buf()],
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
        );
        let tc = locator.locate().unwrap();
        assert_eq!(tc.found_by, Strategy::SearchPath);
        assert_eq!(tc.bin_dir(), first.path());
    }

    #[test]
    fn test_both_executables_required() {
        // node만 있는 디렉토리는 건너뛰어야 함
        let node_only = toolchain_dir(false);
        let complete = toolchain_dir(true);

        let locator = Locator::new(
            Box::new(FixedRegistry(Some(node_only.path().to_path_buf()))),
            vec![node_only.path().to_path_buf()],
            vec![node_only.path().to_path_buf(), complete.path().to_path_buf()],
        );
        let tc = locator.locate().unwrap();
        assert_eq!(tc.found_by, Strategy::SearchPath);
        assert_eq!(tc.bin_dir(), complete.path());
    }

    #[test]
    fn test_not_found() {
        let empty = tempfile::tempdir().unwrap();
        let locator = Locator::new(
            Box::new(FixedRegistry(Some(PathBuf::from("/definitely/not/here")))),
            vec![empty.path().to_path_buf()],
            vec![],
        );
        assert!(locator.locate().is_none());
    }

    #[tokio::test]
    async fn test_locate_async_matches_sync() {
        let known = toolchain_dir(true);
        let locator = Arc::new(Locator::new(
            Box::new(FixedRegistry(None)),
            vec![known.path().to_path_buf()],
            vec![],
        ));
        let tc = locator.clone().locate_async().await.unwrap();
        assert_eq!(Some(tc), locator.locate());
    }

    #[test]
    fn test_install_root_value() {
        assert_eq!(
            install_root_from("C:\\Program Files\\nodejs\\"),
            Some(PathBuf::from("C:\\Program Files\\nodejs\\"))
        );
        assert_eq!(install_root_from("  \0"), None);
        assert_eq!(install_root_from(""), None);
    }

    #[cfg(target_os = "windows")]
    #[test]
    fn test_registry_reads_expand_sz() {
        use winreg::enums::{HKEY_CURRENT_USER, REG_EXPAND_SZ};
        use winreg::{RegKey, RegValue};

        let subkey = r"Software\devstart-test-registry";
        let hkcu = RegKey::predef(HKEY_CURRENT_USER);
        let (key, _) = hkcu.create_subkey(subkey).unwrap();
        let bytes = "C:\\nodejs\\"
            .encode_utf16()
            .chain(Some(0))
            .flat_map(|u| u.to_le_bytes())
            .collect();
        key.set_raw_value(
            REGISTRY_VALUE,
            &RegValue {
                bytes,
                vtype: REG_EXPAND_SZ,
            },
        )
        .unwrap();

        let found = read_install_path(&hkcu, subkey);
        hkcu.delete_subkey_all(subkey).unwrap();
        assert_eq!(found, Some(PathBuf::from("C:\\nodejs\\")));
        assert_eq!(read_install_path(&hkcu, r"Software\devstart-missing-key"), None);
    }

    #[test]
    fn test_default_known_dirs_no_panic() {
        let _ = default_known_dirs();
    }
}
