//! Port Reaper — 지정 포트를 점유한 프로세스를 찾아 강제 종료합니다.
//!
//! 라이브 프로세스 스냅샷을 순회하며 각 프로세스의 로컬 소켓 포트를 조회하고,
//! 첫 번째로 일치하는 프로세스만 종료합니다. 스캔 도중 사라졌거나 접근이
//! 거부된 프로세스는 건너뜁니다. 종료는 best-effort이며, 실제로 종료되었는지
//! 혹은 포트가 비었는지는 확인하지 않습니다.

use std::collections::HashMap;
use std::sync::Mutex;

use sysinfo::System;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("process {pid} exited during the scan")]
    Vanished { pid: u32 },
    #[error("access to process {pid} denied")]
    AccessDenied { pid: u32 },
    #[error("failed to inspect process {pid}: {reason}")]
    Other { pid: u32, reason: String },
}

#[derive(Debug, Clone)]
pub struct RunningProcess {
    pub pid: u32,
    pub name: String,
}

/// 포트를 점유한 프로세스 — 조회 시점에만 유효하며 캐시하지 않음
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortOwner {
    pub pid: u32,
    pub name: String,
    pub port: u16,
}

/// Live process table seen by the reaper.
///
/// `processes()` starts a new scan; implementations refresh whatever
/// per-scan state they keep there.
pub trait ProcessTable: Send + Sync {
    fn processes(&self) -> Vec<RunningProcess>;
    /// Local ports of every socket the process holds
    fn local_ports(&self, pid: u32) -> Result<Vec<u16>, ScanError>;
    /// Best-effort forced kill; does not wait for the exit
    fn kill(&self, pid: u32) -> anyhow::Result<()>;
}

impl<T: ProcessTable + ?Sized> ProcessTable for Box<T> {
    fn processes(&self) -> Vec<RunningProcess> {
        (**self).processes()
    }

    fn local_ports(&self, pid: u32) -> Result<Vec<u16>, ScanError> {
        (**self).local_ports(pid)
    }

    fn kill(&self, pid: u32) -> anyhow::Result<()> {
        (**self).kill(pid)
    }
}

pub struct PortReaper<T: ProcessTable> {
    table: T,
}

impl<T: ProcessTable> PortReaper<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }

    /// Find the first process holding a local socket on `port`.
    pub fn find_owner(&self, port: u16) -> Option<PortOwner> {
        let own_pid = std::process::id();
        let processes = self.table.processes();
        tracing::debug!("Scanning {} processes for port {}", processes.len(), port);

        for process in processes {
            if process.pid == own_pid {
                continue;
            }
            match self.table.local_ports(process.pid) {
                Ok(ports) if ports.contains(&port) => {
                    return Some(PortOwner {
                        pid: process.pid,
                        name: process.name,
                        port,
                    });
                }
                Ok(_) => {}
                Err(e) => tracing::trace!("Skipping {}: {}", process.name, e),
            }
        }
        None
    }

    /// Kill the first process bound to `port`. Returns `true` if one was found.
    pub fn free_port(&self, port: u16) -> bool {
        let Some(owner) = self.find_owner(port) else {
            tracing::debug!("Port {} is free", port);
            return false;
        };

        tracing::info!(
            "Port {} is held by '{}' (pid {}), killing it",
            port,
            owner.name,
            owner.pid
        );
        if let Err(e) = self.table.kill(owner.pid) {
            tracing::warn!("Failed to kill pid {}: {}", owner.pid, e);
        }
        true
    }
}

impl<T: ProcessTable + 'static> PortReaper<T> {
    /// `free_port`의 비동기 래퍼 — 프로세스 테이블 스캔을 블로킹 풀에서 실행
    pub async fn free_port_async(self: std::sync::Arc<Self>, port: u16) -> bool {
        tokio::task::spawn_blocking(move || self.free_port(port))
            .await
            .unwrap_or(false)
    }
}

// ═══════════════════════════════════════════════════════════════
//  System process table
// ═══════════════════════════════════════════════════════════════

/// sysinfo로 프로세스를 열거하고, 플랫폼별로 소켓 포트를 조회합니다.
///
/// - Linux: `/proc/net/{tcp,tcp6,udp,udp6}`의 inode → 포트 맵 + `/proc/<pid>/fd`
/// - macOS: `lsof -nP -iTCP -iUDP -F pn`
/// - Windows: `netstat -ano`
#[derive(Default)]
pub struct SystemProcessTable {
    sockets: Mutex<SocketSnapshot>,
}

#[derive(Default)]
#[allow(dead_code)] // 플랫폼별로 한쪽 맵만 사용
struct SocketSnapshot {
    /// Linux: socket inode → local port
    by_inode: HashMap<u64, u16>,
    /// macOS/Windows: pid → local ports
    by_pid: HashMap<u32, Vec<u16>>,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessTable for SystemProcessTable {
    fn processes(&self) -> Vec<RunningProcess> {
        let mut sys = System::new();
        sys.refresh_processes();

        let snapshot = take_socket_snapshot();
        match self.sockets.lock() {
            Ok(mut guard) => *guard = snapshot,
            Err(e) => tracing::error!("Socket snapshot lock poisoned: {}", e),
        }

        let mut processes: Vec<RunningProcess> = sys
            .processes()
            .iter()
            .map(|(pid, process)| RunningProcess {
                pid: pid.as_u32(),
                name: process.name().to_string(),
            })
            .collect();
        processes.sort_by_key(|p| p.pid);

        tracing::debug!("Found {} running processes", processes.len());
        processes
    }

    #[cfg(target_os = "linux")]
    fn local_ports(&self, pid: u32) -> Result<Vec<u16>, ScanError> {
        let inodes = linux::socket_inodes(pid)?;
        let guard = self.sockets.lock().map_err(|e| ScanError::Other {
            pid,
            reason: e.to_string(),
        })?;
        let mut ports: Vec<u16> = inodes
            .iter()
            .filter_map(|inode| guard.by_inode.get(inode).copied())
            .collect();
        ports.sort_unstable();
        ports.dedup();
        Ok(ports)
    }

    #[cfg(not(target_os = "linux"))]
    fn local_ports(&self, pid: u32) -> Result<Vec<u16>, ScanError> {
        let guard = self.sockets.lock().map_err(|e| ScanError::Other {
            pid,
            reason: e.to_string(),
        })?;
        Ok(guard.by_pid.get(&pid).cloned().unwrap_or_default())
    }

    fn kill(&self, pid: u32) -> anyhow::Result<()> {
        force_kill_pid(pid)
    }
}

#[cfg(target_os = "linux")]
fn take_socket_snapshot() -> SocketSnapshot {
    SocketSnapshot {
        by_inode: linux::socket_table(),
        by_pid: HashMap::new(),
    }
}

#[cfg(target_os = "macos")]
fn take_socket_snapshot() -> SocketSnapshot {
    let mut cmd = std::process::Command::new("lsof");
    cmd.args(["-nP", "-iTCP", "-iUDP", "-F", "pn"]);
    let by_pid = match cmd.output() {
        Ok(out) => parse_lsof(&String::from_utf8_lossy(&out.stdout)),
        Err(e) => {
            tracing::warn!("lsof unavailable: {}", e);
            HashMap::new()
        }
    };
    SocketSnapshot {
        by_inode: HashMap::new(),
        by_pid,
    }
}

#[cfg(target_os = "windows")]
fn take_socket_snapshot() -> SocketSnapshot {
    let mut cmd = std::process::Command::new("netstat");
    cmd.args(["-ano"]);
    crate::utils::apply_creation_flags(&mut cmd);
    let by_pid = match cmd.output() {
        Ok(out) => parse_netstat(&String::from_utf8_lossy(&out.stdout)),
        Err(e) => {
            tracing::warn!("netstat unavailable: {}", e);
            HashMap::new()
        }
    };
    SocketSnapshot {
        by_inode: HashMap::new(),
        by_pid,
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn take_socket_snapshot() -> SocketSnapshot {
    SocketSnapshot::default()
}

/// Force-kill a process by PID. Cross-platform helper.
pub fn force_kill_pid(pid: u32) -> anyhow::Result<()> {
    #[cfg(target_os = "windows")]
    {
        use winapi::um::handleapi::CloseHandle;
        use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
        use winapi::um::winnt::PROCESS_TERMINATE;

        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
            if handle.is_null() {
                anyhow::bail!("failed to open process {}", pid);
            }
            let result = TerminateProcess(handle, 1);
            CloseHandle(handle);
            if result == 0 {
                anyhow::bail!("TerminateProcess failed for pid {}", pid);
            }
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
            .map_err(|e| anyhow::anyhow!("failed to send SIGKILL to {}: {}", pid, e))?;
    }

    Ok(())
}

// ── Output parsers ─────────────────────────────────────────

/// `lsof -F pn` 출력 → pid별 로컬 포트.
/// `p<pid>` 줄 뒤에 `n<local>[-><remote>]` 줄이 이어집니다.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_lsof(stdout: &str) -> HashMap<u32, Vec<u16>> {
    let mut map: HashMap<u32, Vec<u16>> = HashMap::new();
    let mut current: Option<u32> = None;

    for line in stdout.lines() {
        if let Some(pid) = line.strip_prefix('p') {
            current = pid.trim().parse().ok();
        } else if let (Some(name), Some(pid)) = (line.strip_prefix('n'), current) {
            let local = name.split("->").next().unwrap_or(name);
            if let Some(port) = port_of(local) {
                let ports = map.entry(pid).or_default();
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
        }
    }
    map
}

/// `netstat -ano` 출력 → pid별 로컬 포트.
///
/// ```text
///   TCP    0.0.0.0:3001      0.0.0.0:0      LISTENING       4242
///   UDP    [::]:5353         *:*                            1337
/// ```
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn parse_netstat(stdout: &str) -> HashMap<u32, Vec<u16>> {
    let mut map: HashMap<u32, Vec<u16>> = HashMap::new();

    for line in stdout.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        let Some(proto) = cols.first() else { continue };
        if !proto.eq_ignore_ascii_case("TCP") && !proto.eq_ignore_ascii_case("UDP") {
            continue;
        }
        if cols.len() < 4 {
            continue;
        }
        let (Some(port), Some(pid)) = (port_of(cols[1]), cols.last().and_then(|p| p.parse().ok()))
        else {
            continue;
        };
        let ports = map.entry(pid).or_default();
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    map
}

/// `127.0.0.1:3001`, `[::1]:3001`, `*:3001` → 3001
#[cfg_attr(not(any(target_os = "macos", target_os = "windows")), allow(dead_code))]
fn port_of(addr: &str) -> Option<u16> {
    addr.rsplit_once(':')?.1.trim().parse().ok()
}

#[cfg(target_os = "linux")]
mod linux {
    use std::collections::{HashMap, HashSet};

    use procfs::process::{FDTarget, Process};
    use procfs::ProcError;

    use super::ScanError;

    /// inode → local port for every IPv4/IPv6 TCP/UDP socket
    pub(super) fn socket_table() -> HashMap<u64, u16> {
        let mut map = HashMap::new();

        macro_rules! add_entries {
            ($entries:expr, $table:expr) => {
                match $entries {
                    Ok(entries) => map.extend(
                        entries
                            .into_iter()
                            .filter(|e| e.inode != 0)
                            .map(|e| (e.inode, e.local_address.port())),
                    ),
                    Err(e) => tracing::debug!("Cannot read /proc/net/{}: {}", $table, e),
                }
            };
        }

        add_entries!(procfs::net::tcp(), "tcp");
        add_entries!(procfs::net::tcp6(), "tcp6");
        add_entries!(procfs::net::udp(), "udp");
        add_entries!(procfs::net::udp6(), "udp6");
        map
    }

    /// 프로세스가 열어 둔 소켓 fd의 inode 집합
    pub(super) fn socket_inodes(pid: u32) -> Result<HashSet<u64>, ScanError> {
        let fds = i32::try_from(pid)
            .map_err(|_| ScanError::Vanished { pid })
            .and_then(|raw| Process::new(raw).map_err(|e| scan_error(pid, e)))?
            .fd()
            .map_err(|e| scan_error(pid, e))?;

        Ok(fds
            .flatten()
            .filter_map(|fd| match fd.target {
                FDTarget::Socket(inode) => Some(inode),
                _ => None,
            })
            .collect())
    }

    pub(super) fn scan_error(pid: u32, e: ProcError) -> ScanError {
        match e {
            ProcError::NotFound(_) => ScanError::Vanished { pid },
            ProcError::PermissionDenied(_) => ScanError::AccessDenied { pid },
            other => ScanError::Other {
                pid,
                reason: other.to_string(),
            },
        }
    }
}
