//! Filesystem creation on a block device, and per-path attributes.

use crate::process::Cmd;
use std::path::Path;

/// Creates a filesystem of a given type on a device.
#[derive(Debug, Clone)]
pub struct FileSystemBuilder<'a> {
    name: &'a str,
    device: &'a str,
    create_options: &'a [String],
}

impl<'a> FileSystemBuilder<'a> {
    pub fn new(name: &'a str, device: &'a str, create_options: &'a [String]) -> Self {
        Self {
            name,
            device,
            create_options,
        }
    }

    pub fn mkfs_command(&self, label: Option<&str>) -> Cmd {
        let mut cmd = Cmd::new(format!("mkfs.{}", self.name));
        if self.name == "btrfs" || self.name == "xfs" {
            cmd = cmd.arg("-f");
        }
        if let Some(label) = label {
            let flag = if self.name == "vfat" { "-n" } else { "-L" };
            cmd = cmd.args([flag, label]);
        }
        cmd.args(self.create_options.iter().cloned())
            .arg(self.device)
            .error_msg(&format!("mkfs.{} failed", self.name))
    }
}

/// Disable copy-on-write for `path` and everything created below it.
pub fn disable_copy_on_write_command(path: &Path) -> Cmd {
    Cmd::new("chattr")
        .arg("+C")
        .arg_path(path)
        .error_msg("chattr +C failed")
}
