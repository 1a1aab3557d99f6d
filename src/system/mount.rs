//! Mount handling for a single device/mountpoint pair.

use crate::error::{Error, Result};
use crate::process::{Cmd, CommandRunner};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Mounts `device` at `mountpoint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountManager {
    pub device: Option<String>,
    pub mountpoint: PathBuf,
}

impl MountManager {
    pub fn new(device: Option<String>, mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            device,
            mountpoint: mountpoint.into(),
        }
    }

    pub fn mount_command(&self, options: &[String]) -> Result<Cmd> {
        let device = self.device.as_deref().ok_or_else(|| {
            Error::Setup(format!(
                "no device to mount at {}",
                self.mountpoint.display()
            ))
        })?;
        let mut cmd = Cmd::new("mount");
        if !options.is_empty() {
            cmd = cmd.args(["-o".to_string(), options.join(",")]);
        }
        Ok(cmd
            .arg(device)
            .arg_path(&self.mountpoint)
            .error_msg("mount failed"))
    }

    pub fn mount(&self, runner: &dyn CommandRunner, options: &[String]) -> Result<()> {
        runner.run(self.mount_command(options)?)?;
        Ok(())
    }

    /// Umount if mounted. Returns false if the mountpoint stays busy.
    pub fn umount(&self, runner: &dyn CommandRunner) -> Result<bool> {
        if !self.is_mounted()? {
            return Ok(true);
        }
        let result = runner.run(Cmd::new("umount").arg_path(&self.mountpoint).allow_fail())?;
        if !result.success() {
            warn!(
                "{} still busy: {}",
                self.mountpoint.display(),
                result.stderr.trim()
            );
            return Ok(false);
        }
        Ok(true)
    }

    pub fn is_mounted(&self) -> Result<bool> {
        let table = fs::read_to_string(PROC_MOUNTS).map_err(|e| Error::io(PROC_MOUNTS, e))?;
        Ok(mount_table_contains(&table, &self.mountpoint))
    }
}

/// Whether a `/proc/mounts` formatted table lists `mountpoint`.
fn mount_table_contains(table: &str, mountpoint: &Path) -> bool {
    let wanted = fs::canonicalize(mountpoint).unwrap_or_else(|_| mountpoint.to_path_buf());
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|target| Path::new(&unescape_mount_path(target)) == wanted)
}

/// `/proc/mounts` escapes space, tab, newline and backslash as octal.
fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}
