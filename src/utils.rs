//! Shared helpers for devstart: platform flags, executable names and PATH handling.

use std::ffi::OsString;
use std::path::Path;

/// Apply platform-specific flags to hide the console window on Windows.
/// Used for short helper tools (`reg`, `netstat`, `taskkill`, `lsof`) whose
/// output is always captured. On non-Windows platforms, this is a no-op.
#[cfg(target_os = "windows")]
pub fn apply_creation_flags(cmd: &mut std::process::Command) -> &mut std::process::Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW)
}

#[cfg(not(target_os = "windows"))]
pub fn apply_creation_flags(cmd: &mut std::process::Command) -> &mut std::process::Command {
    cmd
}

/// Platform file name of the Node.js runtime
pub fn node_exe_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "node.exe"
    } else {
        "node"
    }
}

/// Platform file name of npm (Windows ships a `.cmd` shim)
pub fn npm_exe_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "npm.cmd"
    } else {
        "npm"
    }
}

/// `dir`을 맨 앞에 둔 PATH 값을 만듭니다. 자식 프로세스의 npm 스크립트가
/// 같은 툴체인의 node를 찾도록 하기 위함.
pub fn path_with_prefix(dir: &Path) -> OsString {
    let mut entries = vec![dir.to_path_buf()];
    if let Some(current) = std::env::var_os("PATH") {
        entries.extend(std::env::split_paths(&current).filter(|p| p != dir));
    }
    std::env::join_paths(entries).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_path_with_prefix_puts_dir_first() {
        let dir = PathBuf::from(if cfg!(windows) { r"C:\toolchain" } else { "/opt/toolchain/bin" });
        let joined = path_with_prefix(&dir);
        let first = std::env::split_paths(&joined).next();
        assert_eq!(first, Some(dir));
    }

    #[test]
    fn test_exe_names_differ_per_platform() {
        #[cfg(target_os = "windows")]
        assert_eq!(npm_exe_name(), "npm.cmd");
        #[cfg(not(target_os = "windows"))]
        {
            assert_eq!(node_exe_name(), "node");
            assert_eq!(npm_exe_name(), "npm");
        }
    }
}
