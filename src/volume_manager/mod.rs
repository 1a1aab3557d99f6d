//! Volume management.
//!
//! [`VolumeManagerBase`] owns the layout and size policy, the
//! [`VolumeManager`] trait is the set of hooks a backend provides on top
//! of it. [`VolumeManagerBackend`] is the closed set of backends.
//!
//! Every backend releases its volumes on [`cleanup`](VolumeManager::cleanup),
//! and again from `Drop` if the caller did not. Volumes are unmounted
//! before their mount root is removed; a mount root that cannot be
//! unmounted is left in place.

pub mod base;
pub mod btrfs;
pub mod lvm;

pub use base::{CanonicalVolumes, DeviceMap, VolumeManagerArgs, VolumeManagerBase, VolumeMount};
pub use btrfs::BtrfsVolumeManager;
pub use lvm::LvmVolumeManager;

use crate::descriptor::Volume;
use crate::error::{Error, Result};
use crate::storage::DeviceProvider;
use crate::system::mount::MountManager;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// How fstab entries refer to a filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Persistency {
    #[default]
    ByUuid,
    ByLabel,
}

impl Persistency {
    /// The blkid tag used for lookup and in fstab.
    pub fn blkid_type(&self) -> &'static str {
        match self {
            Self::ByUuid => "UUID",
            Self::ByLabel => "LABEL",
        }
    }
}

pub trait VolumeManager {
    fn base(&self) -> &VolumeManagerBase;

    fn base_mut(&mut self) -> &mut VolumeManagerBase;

    /// Prepare the device, e.g. create the volume group. `name` names the
    /// container if the backend has one.
    fn setup(&mut self, name: Option<&str>) -> Result<()>;

    /// Create, format and register all volumes.
    fn create_volumes(&mut self, filesystem_name: &str) -> Result<()>;

    /// fstab lines for all volumes except the root volume.
    fn get_fstab(&self, persistency: Persistency, filesystem_name: &str) -> Result<Vec<String>>;

    /// Mount options and device by volume path relative to `/`.
    fn get_volumes(&self) -> BTreeMap<String, VolumeMount>;

    /// Mount all volumes, ancestors first.
    fn mount_volumes(&mut self) -> Result<()>;

    /// Unmount all volumes, descendants first. Returns false if any
    /// volume stays busy.
    fn umount_volumes(&mut self) -> Result<bool>;

    /// Release everything the backend created. Safe to call repeatedly.
    fn cleanup(&mut self) -> Result<()>;

    fn set_property_readonly_root(&mut self) -> Result<()> {
        Err(Error::Setup("read only property not supported".to_string()))
    }

    /// Copy the root tree onto the volumes. Volumes are mounted for the
    /// copy if needed and are unmounted again before this returns.
    fn sync_data(&mut self, exclude: &[String]) -> Result<()> {
        let Some(mountpoint) = self.base().mountpoint().map(Path::to_path_buf) else {
            return Ok(());
        };
        if !MountManager::new(None, &mountpoint).is_mounted()? {
            self.mount_volumes()?;
        }
        let synced = self.base().sync_root_to(&mountpoint, exclude);
        let unmounted = self.umount_volumes();
        synced?;
        if !unmounted? {
            return Err(Error::Setup(format!(
                "volumes below {} still busy after sync",
                mountpoint.display()
            )));
        }
        Ok(())
    }

    fn get_device(&self) -> DeviceMap<'_> {
        self.base().get_device()
    }

    fn is_loop(&self) -> bool {
        self.base().is_loop()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeManagerKind {
    Lvm,
    Btrfs,
}

impl VolumeManagerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lvm => "lvm",
            Self::Btrfs => "btrfs",
        }
    }

    /// Host tools the backend runs.
    pub fn required_tools(&self) -> &'static [&'static str] {
        match self {
            Self::Lvm => &[
                "vgs", "vgremove", "pvcreate", "vgcreate", "lvcreate", "vgscan", "vgchange",
                "mount", "umount", "rsync", "chattr",
            ],
            Self::Btrfs => &[
                "mkfs.btrfs", "btrfs", "blkid", "mount", "umount", "rsync", "chattr",
            ],
        }
    }
}

impl FromStr for VolumeManagerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lvm" => Ok(Self::Lvm),
            "btrfs" => Ok(Self::Btrfs),
            other => Err(Error::Configuration(format!(
                "Support for {} volume manager not implemented",
                other
            ))),
        }
    }
}

/// One of the supported volume manager backends.
pub enum VolumeManagerBackend {
    Lvm(LvmVolumeManager),
    Btrfs(BtrfsVolumeManager),
}

impl VolumeManagerBackend {
    pub fn new(
        kind: VolumeManagerKind,
        device_provider: Box<dyn DeviceProvider>,
        root_dir: &Path,
        volumes: Vec<Volume>,
        custom_args: VolumeManagerArgs,
    ) -> Result<Self> {
        info!("Using {} volume manager", kind.as_str());
        Ok(match kind {
            VolumeManagerKind::Lvm => Self::Lvm(LvmVolumeManager::new(
                device_provider,
                root_dir,
                volumes,
                custom_args,
            )?),
            VolumeManagerKind::Btrfs => Self::Btrfs(BtrfsVolumeManager::new(
                device_provider,
                root_dir,
                volumes,
                custom_args,
            )?),
        })
    }

    pub fn kind(&self) -> VolumeManagerKind {
        match self {
            Self::Lvm(_) => VolumeManagerKind::Lvm,
            Self::Btrfs(_) => VolumeManagerKind::Btrfs,
        }
    }

    fn backend(&self) -> &dyn VolumeManager {
        match self {
            Self::Lvm(manager) => manager,
            Self::Btrfs(manager) => manager,
        }
    }

    fn backend_mut(&mut self) -> &mut dyn VolumeManager {
        match self {
            Self::Lvm(manager) => manager,
            Self::Btrfs(manager) => manager,
        }
    }
}

impl VolumeManager for VolumeManagerBackend {
    fn base(&self) -> &VolumeManagerBase {
        self.backend().base()
    }

    fn base_mut(&mut self) -> &mut VolumeManagerBase {
        self.backend_mut().base_mut()
    }

    fn setup(&mut self, name: Option<&str>) -> Result<()> {
        self.backend_mut().setup(name)
    }

    fn create_volumes(&mut self, filesystem_name: &str) -> Result<()> {
        self.backend_mut().create_volumes(filesystem_name)
    }

    fn get_fstab(&self, persistency: Persistency, filesystem_name: &str) -> Result<Vec<String>> {
        self.backend().get_fstab(persistency, filesystem_name)
    }

    fn get_volumes(&self) -> BTreeMap<String, VolumeMount> {
        self.backend().get_volumes()
    }

    fn mount_volumes(&mut self) -> Result<()> {
        self.backend_mut().mount_volumes()
    }

    fn umount_volumes(&mut self) -> Result<bool> {
        self.backend_mut().umount_volumes()
    }

    fn cleanup(&mut self) -> Result<()> {
        self.backend_mut().cleanup()
    }

    fn set_property_readonly_root(&mut self) -> Result<()> {
        self.backend_mut().set_property_readonly_root()
    }

    fn sync_data(&mut self, exclude: &[String]) -> Result<()> {
        self.backend_mut().sync_data(exclude)
    }

    fn get_device(&self) -> DeviceMap<'_> {
        self.backend().get_device()
    }

    fn is_loop(&self) -> bool {
        self.backend().is_loop()
    }
}
