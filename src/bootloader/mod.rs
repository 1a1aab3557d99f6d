//! Bootloader configuration.
//!
//! [`BootConfigBase`] computes the boot policy every backend shares. The
//! [`BootLoaderConfig`] trait is what a backend must provide on top of it;
//! none of its hooks have a default, so a backend that forgets one does
//! not compile. [`BootLoader`] is the closed set of backends.
//!
//! # Example
//!
//! ```rust,ignore
//! use appliance_builder::bootloader::{BootLoader, BootLoaderConfig, BootLoaderKind};
//!
//! let mut loader = BootLoader::new(
//!     BootLoaderKind::Grub2, descriptor, &root_dir, None, Default::default(),
//! );
//! loader.setup_disk_image_config(&boot_uuid, None, "vmlinuz", "initrd")?;
//! loader.write()?;
//! ```

pub mod base;
pub mod grub2;
pub mod isolinux;

pub use base::{BootConfigBase, CustomArgs};
pub use grub2::Grub2Config;
pub use isolinux::IsolinuxConfig;

use crate::descriptor::ApplianceDescriptor;
use crate::error::{Error, Result};
use crate::system::identifier::SystemIdentifier;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Hooks that render the shared boot policy into bootloader files.
pub trait BootLoaderConfig {
    fn base(&self) -> &BootConfigBase;

    /// Write the configuration set up by one of the `setup_*_config` calls.
    fn write(&mut self) -> Result<()>;

    /// Configuration to boot the installed disk, found via `boot_uuid`.
    fn setup_disk_image_config(
        &mut self,
        boot_uuid: &str,
        hypervisor: Option<&str>,
        kernel: &str,
        initrd: &str,
    ) -> Result<()>;

    /// Configuration to boot install media, found via `mbrid`.
    fn setup_install_image_config(
        &mut self,
        mbrid: &SystemIdentifier,
        hypervisor: Option<&str>,
        kernel: &str,
        initrd: &str,
    ) -> Result<()>;

    /// Configuration to boot a live ISO, found via `mbrid`.
    fn setup_live_image_config(
        &mut self,
        mbrid: &SystemIdentifier,
        hypervisor: Option<&str>,
        kernel: &str,
        initrd: &str,
    ) -> Result<()>;

    /// Loader images needed to boot from disk.
    fn setup_disk_boot_images(&mut self, boot_uuid: &str, lookup_path: Option<&Path>)
        -> Result<()>;

    /// Loader images needed to boot install media.
    fn setup_install_boot_images(
        &mut self,
        mbrid: &SystemIdentifier,
        lookup_path: Option<&Path>,
    ) -> Result<()>;

    /// Loader images needed to boot a live ISO.
    fn setup_live_boot_images(
        &mut self,
        mbrid: &SystemIdentifier,
        lookup_path: Option<&Path>,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootLoaderKind {
    /// EFI and BIOS via grub2.
    Grub2,
    /// Legacy BIOS ISO boot.
    Isolinux,
}

impl BootLoaderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grub2 => "grub2",
            Self::Isolinux => "isolinux",
        }
    }
}

impl FromStr for BootLoaderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "grub2" => Ok(Self::Grub2),
            "isolinux" => Ok(Self::Isolinux),
            other => Err(Error::Configuration(format!(
                "Support for {} bootloader not implemented",
                other
            ))),
        }
    }
}

/// One of the supported bootloader backends.
pub enum BootLoader {
    Grub2(Grub2Config),
    Isolinux(IsolinuxConfig),
}

impl BootLoader {
    /// `boot_dir` is where boot files are placed, the root directory if
    /// not given (disk images), a media directory for ISO images.
    pub fn new(
        kind: BootLoaderKind,
        descriptor: Arc<ApplianceDescriptor>,
        root_dir: &Path,
        boot_dir: Option<&Path>,
        custom_args: CustomArgs,
    ) -> Self {
        match kind {
            BootLoaderKind::Grub2 => {
                Self::Grub2(Grub2Config::new(descriptor, root_dir, boot_dir, custom_args))
            }
            BootLoaderKind::Isolinux => {
                Self::Isolinux(IsolinuxConfig::new(descriptor, root_dir, boot_dir, custom_args))
            }
        }
    }

    pub fn kind(&self) -> BootLoaderKind {
        match self {
            Self::Grub2(_) => BootLoaderKind::Grub2,
            Self::Isolinux(_) => BootLoaderKind::Isolinux,
        }
    }

    fn backend(&self) -> &dyn BootLoaderConfig {
        match self {
            Self::Grub2(config) => config,
            Self::Isolinux(config) => config,
        }
    }

    fn backend_mut(&mut self) -> &mut dyn BootLoaderConfig {
        match self {
            Self::Grub2(config) => config,
            Self::Isolinux(config) => config,
        }
    }
}

impl BootLoaderConfig for BootLoader {
    fn base(&self) -> &BootConfigBase {
        self.backend().base()
    }

    fn write(&mut self) -> Result<()> {
        self.backend_mut().write()
    }

    fn setup_disk_image_config(
        &mut self,
        boot_uuid: &str,
        hypervisor: Option<&str>,
        kernel: &str,
        initrd: &str,
    ) -> Result<()> {
        self.backend_mut()
            .setup_disk_image_config(boot_uuid, hypervisor, kernel, initrd)
    }

    fn setup_install_image_config(
        &mut self,
        mbrid: &SystemIdentifier,
        hypervisor: Option<&str>,
        kernel: &str,
        initrd: &str,
    ) -> Result<()> {
        self.backend_mut()
            .setup_install_image_config(mbrid, hypervisor, kernel, initrd)
    }

    fn setup_live_image_config(
        &mut self,
        mbrid: &SystemIdentifier,
        hypervisor: Option<&str>,
        kernel: &str,
        initrd: &str,
    ) -> Result<()> {
        self.backend_mut()
            .setup_live_image_config(mbrid, hypervisor, kernel, initrd)
    }

    fn setup_disk_boot_images(&mut self, boot_uuid: &str, lookup_path: Option<&Path>) -> Result<()> {
        self.backend_mut().setup_disk_boot_images(boot_uuid, lookup_path)
    }

    fn setup_install_boot_images(
        &mut self,
        mbrid: &SystemIdentifier,
        lookup_path: Option<&Path>,
    ) -> Result<()> {
        self.backend_mut().setup_install_boot_images(mbrid, lookup_path)
    }

    fn setup_live_boot_images(
        &mut self,
        mbrid: &SystemIdentifier,
        lookup_path: Option<&Path>,
    ) -> Result<()> {
        self.backend_mut().setup_live_boot_images(mbrid, lookup_path)
    }
}
