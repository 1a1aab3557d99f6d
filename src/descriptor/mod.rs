//! Appliance descriptor.
//!
//! The descriptor is loaded once per build from a TOML document and then
//! shared read-only (behind an `Arc`) between the bootloader and volume
//! manager backends. Nothing in this crate mutates it after loading.
//!
//! # Example
//!
//! ```toml
//! name = "appliance"
//! displayname = "My Appliance"
//!
//! [build-type]
//! image = "oem"
//! filesystem = "btrfs"
//! firmware = "efi"
//! kernelcmdline = "splash"
//!
//! [[preferences]]
//! bootloader-theme = "starfield"
//!
//! [[volumes]]
//! name = "var"
//! realpath = "/var"
//! size = "freespace:100"
//! ```

mod types;
mod volume;

pub use types::{BootTarget, FirmwareType, ImageType};
pub use volume::{SizeKind, Volume, VolumeSize, NO_COPY_ON_WRITE};

use crate::bootloader::BootLoaderKind;
use crate::error::{Error, Result};
use crate::volume_manager::{Persistency, VolumeManagerKind};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Filesystem that lays volumes out as subvolumes below `@`.
pub const SUBVOLUME_FILESYSTEM: &str = "btrfs";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ApplianceDescriptor {
    pub name: String,
    pub displayname: Option<String>,
    pub build_type: BuildType,
    #[serde(default)]
    pub preferences: Vec<Preferences>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct BuildType {
    pub image: ImageType,
    pub filesystem: Option<String>,
    pub firmware: Option<FirmwareType>,
    pub kernelcmdline: Option<String>,
    pub installprovidefailsafe: Option<bool>,
    pub installboot: Option<String>,
    pub volume_id: Option<String>,
    pub boot_timeout: Option<u32>,
    pub bootpartition: Option<bool>,
    pub volume_manager: Option<VolumeManagerKind>,
    pub bootloader: Option<BootLoaderKind>,
    pub devicepersistency: Option<Persistency>,
    pub mdraid: Option<String>,
    #[serde(default)]
    pub overlayroot: bool,
    pub machine: Option<Machine>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Preferences {
    pub bootloader_theme: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Machine {
    pub domain: Option<String>,
}

impl ApplianceDescriptor {
    /// Load and parse a descriptor file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&content).map_err(|source| Error::Descriptor {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn get_preferences_sections(&self) -> &[Preferences] {
        &self.preferences
    }

    pub fn get_build_type_machine_section(&self) -> Option<&Machine> {
        self.build_type.machine.as_ref()
    }

    pub fn get_volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn firmware(&self) -> FirmwareType {
        self.build_type.firmware.unwrap_or_default()
    }

    pub fn filesystem(&self) -> Option<&str> {
        self.build_type.filesystem.as_deref()
    }

    /// grub2 unless the build type names another bootloader.
    pub fn bootloader(&self) -> BootLoaderKind {
        self.build_type.bootloader.unwrap_or(BootLoaderKind::Grub2)
    }

    pub fn device_persistency(&self) -> Persistency {
        self.build_type.devicepersistency.unwrap_or_default()
    }
}
