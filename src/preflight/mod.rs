//! Preflight checks for host tools.
//!
//! Volume managers shell out to LVM, btrfs and mount tools. Checking for
//! them up front turns a failure halfway through a build into one error
//! listing everything that is missing.
//!
//! # Example
//!
//! ```rust,ignore
//! use appliance_builder::preflight::check_volume_manager_tools;
//! use appliance_builder::volume_manager::VolumeManagerKind;
//!
//! check_volume_manager_tools(VolumeManagerKind::Lvm)?;
//! ```

use crate::error::{Error, Result};
use crate::volume_manager::VolumeManagerKind;

/// Check if a command exists in PATH.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Fail with a setup error naming every tool not found in PATH.
pub fn check_required_tools(tools: &[&str]) -> Result<()> {
    let missing: Vec<&str> = tools
        .iter()
        .copied()
        .filter(|tool| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        return Err(Error::Setup(format!(
            "Missing required host tools: {}",
            missing.join(", ")
        )));
    }

    Ok(())
}

pub fn check_volume_manager_tools(kind: VolumeManagerKind) -> Result<()> {
    check_required_tools(kind.required_tools())
}
