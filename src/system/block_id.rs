//! Filesystem identifier lookup via `blkid`.

use crate::error::{Error, Result};
use crate::process::{Cmd, CommandRunner};

/// Reads identifiers such as `UUID` or `LABEL` from a device.
#[derive(Debug, Clone)]
pub struct BlockId {
    device: String,
}

impl BlockId {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }

    pub fn blkid_command(&self, id_type: &str) -> Cmd {
        Cmd::new("blkid")
            .arg(&self.device)
            .args(["-s", id_type, "-o", "value"])
            .error_msg("blkid failed")
    }

    pub fn get_blkid(&self, runner: &dyn CommandRunner, id_type: &str) -> Result<String> {
        let result = runner.run(self.blkid_command(id_type))?;
        let value = result.stdout.trim();
        if value.is_empty() {
            return Err(Error::Setup(format!(
                "no {} found on {}",
                id_type, self.device
            )));
        }
        Ok(value.to_string())
    }
}
