//! Transport daemon discovery
//!
//! Looks through the live process table for the daemon and returns the
//! executable it was started from. Matches whose command line has a path
//! inside this supervisor's install directory are ignored, as is this
//! process itself.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::config::TransportConfig;
use crate::error::LocateError;

/// Finds the running transport daemon's executable
#[async_trait]
pub trait TransportLocator: Send + Sync {
    async fn locate(&self) -> Result<PathBuf, LocateError>;
}

/// Snapshot of one row of the process table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub cmd: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl ProcessEntry {
    pub fn new(pid: u32, cmd: &[&str]) -> Self {
        Self {
            pid,
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
            cwd: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Scans the process table with `sysinfo`
#[derive(Debug, Clone)]
pub struct ProcessTableLocator {
    daemon_name: String,
    exclude_dir: Option<PathBuf>,
    own_pid: u32,
}

impl ProcessTableLocator {
    pub fn new(daemon_name: impl Into<String>, exclude_dir: Option<PathBuf>) -> Self {
        Self {
            daemon_name: daemon_name.into(),
            exclude_dir,
            own_pid: std::process::id(),
        }
    }

    fn snapshot() -> Vec<ProcessEntry> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cmd(UpdateKind::Always)
                .with_cwd(UpdateKind::Always),
        );

        system
            .processes()
            .values()
            .map(|process| ProcessEntry {
                pid: process.pid().as_u32(),
                cmd: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect(),
                cwd: process.cwd().map(Path::to_path_buf),
            })
            .collect()
    }
}

#[async_trait]
impl TransportLocator for ProcessTableLocator {
    async fn locate(&self) -> Result<PathBuf, LocateError> {
        // /proc scanning blocks; keep it off the async workers
        let entries = tokio::task::spawn_blocking(Self::snapshot)
            .await
            .unwrap_or_default();

        select_executable(
            entries,
            &self.daemon_name,
            self.exclude_dir.as_deref(),
            self.own_pid,
        )
    }
}

/// Always answers with a configured executable, if it exists
#[derive(Debug, Clone)]
pub struct FixedLocator {
    executable: PathBuf,
}

impl FixedLocator {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

#[async_trait]
impl TransportLocator for FixedLocator {
    async fn locate(&self) -> Result<PathBuf, LocateError> {
        match tokio::fs::metadata(&self.executable).await {
            Ok(meta) if meta.is_file() => Ok(self.executable.clone()),
            _ => Err(LocateError::MissingExecutable(self.executable.clone())),
        }
    }
}

/// Build the locator described by the transport configuration
pub fn locator_from_config(config: &TransportConfig) -> Arc<dyn TransportLocator> {
    match &config.executable {
        Some(executable) => Arc::new(FixedLocator::new(executable)),
        None => {
            let exclude_dir = config
                .exclude_dir
                .clone()
                .or_else(install_dir);
            Arc::new(ProcessTableLocator::new(
                config.daemon_name.clone(),
                exclude_dir,
            ))
        }
    }
}

/// Directory holding the running binary
fn install_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Pick the daemon executable out of a process table snapshot.
///
/// A row matches when its program name contains `daemon_name`. Rows from
/// `own_pid`, or with an argument that is a path under `exclude_dir`, are
/// skipped. Paths are compared by component, so `/home/user` does not
/// cover `/home/user2`. Distinct executables
/// are deduplicated, so the daemon plus its own `pubsub sub` children count
/// once; more than one distinct executable is ambiguous.
pub fn select_executable(
    entries: impl IntoIterator<Item = ProcessEntry>,
    daemon_name: &str,
    exclude_dir: Option<&Path>,
    own_pid: u32,
) -> Result<PathBuf, LocateError> {
    // Excluding "/" would exclude every absolute command line
    let exclude = exclude_dir.filter(|dir| dir.parent().is_some());

    let candidates: BTreeSet<PathBuf> = entries
        .into_iter()
        .filter(|entry| entry.pid != own_pid)
        .filter(|entry| match exclude {
            Some(dir) => !entry.cmd.iter().any(|arg| Path::new(arg).starts_with(dir)),
            None => true,
        })
        .filter_map(|entry| {
            let program = entry.cmd.first()?;
            let name = Path::new(program).file_name()?.to_string_lossy();
            if !name.contains(daemon_name) {
                return None;
            }
            Some(resolve_program(program, entry.cwd.as_deref()))
        })
        .collect();

    let mut iter = candidates.into_iter();
    match (iter.next(), iter.next()) {
        (Some(only), None) => Ok(only),
        (None, _) => Err(LocateError::NotFound {
            daemon: daemon_name.to_string(),
        }),
        (Some(first), Some(second)) => {
            let mut all = vec![first, second];
            all.extend(iter);
            Err(LocateError::Ambiguous {
                daemon: daemon_name.to_string(),
                candidates: all,
            })
        }
    }
}

/// Relative program paths are relative to the process's own working
/// directory; bare names are left for PATH lookup at spawn time.
fn resolve_program(program: &str, cwd: Option<&Path>) -> PathBuf {
    let path = Path::new(program);
    if path.is_absolute() || path.components().count() == 1 {
        return path.to_path_buf();
    }
    match cwd {
        Some(cwd) => cwd.join(path),
        None => path.to_path_buf(),
    }
}
