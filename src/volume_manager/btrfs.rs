//! btrfs volume manager: one filesystem, a root subvolume `@` and one
//! nested subvolume per configured volume.

use super::base::{VolumeManagerArgs, VolumeManagerBase, VolumeMount};
use super::{Persistency, VolumeManager};
use crate::descriptor::Volume;
use crate::error::{Error, Result};
use crate::process::Cmd;
use crate::storage::DeviceProvider;
use crate::system::block_id::BlockId;
use crate::system::filesystem::FileSystemBuilder;
use crate::system::mount::MountManager;
use crate::system::path;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Subvolume holding the root tree, set as the default subvolume.
const ROOT_SUBVOLUME: &str = "@";

/// Mount option selecting the btrfs toplevel. Without it a mount picks
/// the default subvolume, which is `@` once setup has run.
const TOPLEVEL_SUBVOLUME: &str = "subvolid=5";

pub struct BtrfsVolumeManager {
    base: VolumeManagerBase,
    toplevel_mount: Option<MountManager>,
    mount_options: Vec<String>,
    subvolumes: Vec<Volume>,
}

impl BtrfsVolumeManager {
    pub fn new(
        device_provider: Box<dyn DeviceProvider>,
        root_dir: &Path,
        volumes: Vec<Volume>,
        custom_args: VolumeManagerArgs,
    ) -> Result<Self> {
        let mount_options = custom_args.fs_mount_options.clone();
        Ok(Self {
            base: VolumeManagerBase::new("btrfs", device_provider, root_dir, volumes, custom_args)?,
            toplevel_mount: None,
            mount_options,
            subvolumes: Vec::new(),
        })
    }

    fn toplevel(&self) -> Result<&MountManager> {
        self.toplevel_mount
            .as_ref()
            .ok_or_else(|| Error::Setup("btrfs toplevel volume not set up".to_string()))
    }

    fn root_subvolume_path(toplevel: &MountManager) -> PathBuf {
        toplevel.mountpoint.join(ROOT_SUBVOLUME)
    }

    /// Mount option selecting the subvolume of `volume`.
    fn subvol_option(volume: &Volume) -> String {
        format!(
            "subvol={}/{}",
            ROOT_SUBVOLUME,
            volume.realpath.trim_start_matches('/')
        )
    }

    fn toplevel_options(&self) -> Vec<String> {
        let mut options = vec![TOPLEVEL_SUBVOLUME.to_string()];
        options.extend(self.mount_options.iter().cloned());
        options
    }

    fn volume_options(&self, volume: &Volume) -> Vec<String> {
        let mut options = self.mount_options.clone();
        options.push(Self::subvol_option(volume));
        options
    }

    fn create_subvolume(
        &mut self,
        root_subvolume: &Path,
        volume: &Volume,
        filesystem_name: &str,
    ) -> Result<()> {
        info!("--> creating btrfs subvolume {}", volume.realpath);
        let subvolume = path::join_root(root_subvolume, &volume.realpath);
        if let Some(parent) = subvolume.parent() {
            path::create(parent)?;
        }
        self.base.run(
            Cmd::new("btrfs")
                .args(["subvolume", "create"])
                .arg_path(&subvolume)
                .error_msg("btrfs subvolume create failed"),
        )?;
        self.base.apply_attributes_on_volume(root_subvolume, volume)?;

        let custom_args = self.base.custom_args();
        if custom_args.quota_groups && volume.size.is_some() && !volume.fullsize {
            let mbsize = self.base.get_volume_mbsize(
                volume,
                self.base.volumes(),
                filesystem_name,
                custom_args.image_type,
            )?;
            self.base.run(
                Cmd::new("btrfs")
                    .args(["qgroup", "limit"])
                    .arg(format!("{}M", mbsize))
                    .arg_path(&subvolume)
                    .error_msg("btrfs qgroup limit failed"),
            )?;
        }

        self.subvolumes.push(volume.clone());
        Ok(())
    }
}

/// ID of the subvolume at `subvolume_path` in `btrfs subvolume list` output.
fn subvolume_id(list: &str, subvolume_path: &str) -> Option<String> {
    list.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match (fields.first(), fields.get(1), fields.last()) {
            (Some(&"ID"), Some(id), Some(path)) if *path == subvolume_path => Some(id.to_string()),
            _ => None,
        }
    })
}

impl VolumeManager for BtrfsVolumeManager {
    fn base(&self) -> &VolumeManagerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut VolumeManagerBase {
        &mut self.base
    }

    /// Create the filesystem and its default root subvolume. btrfs has no
    /// named container, `name` is ignored.
    fn setup(&mut self, _name: Option<&str>) -> Result<()> {
        let _enter = self.base.span().clone().entered();
        let device = self.base.device().to_string();
        let custom_args = self.base.custom_args();
        info!("Creating btrfs filesystem on {}", device);
        let mkfs = FileSystemBuilder::new("btrfs", &device, &custom_args.fs_create_options)
            .mkfs_command(Some(custom_args.root_label()));
        let quota_groups = custom_args.quota_groups;
        self.base.run(mkfs)?;

        let mountpoint = self.base.setup_mountpoint()?.to_path_buf();
        let toplevel = MountManager::new(Some(device), &mountpoint);
        toplevel.mount(self.base.runner(), &self.toplevel_options())?;
        self.toplevel_mount = Some(toplevel);

        if quota_groups {
            self.base.run(
                Cmd::new("btrfs")
                    .args(["quota", "enable"])
                    .arg_path(&mountpoint)
                    .error_msg("btrfs quota enable failed"),
            )?;
        }

        let root_subvolume = mountpoint.join(ROOT_SUBVOLUME);
        self.base.run(
            Cmd::new("btrfs")
                .args(["subvolume", "create"])
                .arg_path(&root_subvolume)
                .error_msg("btrfs subvolume create failed"),
        )?;
        let list = self.base.run(
            Cmd::new("btrfs")
                .args(["subvolume", "list"])
                .arg_path(&mountpoint),
        )?;
        let id = subvolume_id(&list.stdout, ROOT_SUBVOLUME).ok_or_else(|| {
            Error::Setup(format!("no ID found for subvolume {}", ROOT_SUBVOLUME))
        })?;
        self.base.run(
            Cmd::new("btrfs")
                .args(["subvolume", "set-default"])
                .arg(id)
                .arg_path(&mountpoint)
                .error_msg("btrfs subvolume set-default failed"),
        )?;
        Ok(())
    }

    fn create_volumes(&mut self, filesystem_name: &str) -> Result<()> {
        let root_subvolume = Self::root_subvolume_path(self.toplevel()?);
        let _enter = self.base.span().clone().entered();

        self.base.create_volume_paths_in_root_dir()?;
        let canonical = self.base.get_canonical_volume_list();
        for volume in canonical
            .volumes
            .iter()
            .chain(canonical.full_size_volume.iter())
        {
            // the root subvolume already exists
            if volume.is_root() {
                continue;
            }
            self.create_subvolume(&root_subvolume, volume, filesystem_name)?;
        }
        Ok(())
    }

    fn get_fstab(&self, persistency: Persistency, _filesystem_name: &str) -> Result<Vec<String>> {
        let blkid_type = persistency.blkid_type();
        let device_id =
            BlockId::new(self.base.device()).get_blkid(self.base.runner(), blkid_type)?;
        Ok(self
            .subvolumes
            .iter()
            .map(|volume| {
                format!(
                    "{}={} {} btrfs {} 0 0",
                    blkid_type,
                    device_id,
                    volume.realpath,
                    self.volume_options(volume).join(",")
                )
            })
            .collect())
    }

    fn get_volumes(&self) -> BTreeMap<String, VolumeMount> {
        self.subvolumes
            .iter()
            .map(|volume| {
                (
                    volume.realpath.trim_start_matches('/').to_string(),
                    VolumeMount {
                        volume_options: self.volume_options(volume).join(","),
                        volume_device: self.base.device().to_string(),
                    },
                )
            })
            .collect()
    }

    /// All subvolumes are reachable through the toplevel mount.
    fn mount_volumes(&mut self) -> Result<()> {
        let toplevel = self.toplevel()?;
        if !toplevel.is_mounted()? {
            path::create(&toplevel.mountpoint)?;
            toplevel.mount(self.base.runner(), &self.toplevel_options())?;
        }
        Ok(())
    }

    fn umount_volumes(&mut self) -> Result<bool> {
        match &self.toplevel_mount {
            Some(toplevel) => toplevel.umount(self.base.runner()),
            None => Ok(true),
        }
    }

    fn cleanup(&mut self) -> Result<()> {
        let unmounted = self.umount_volumes()?;
        self.base.release_mountpoint(unmounted)?;
        if unmounted {
            self.toplevel_mount = None;
        }
        Ok(())
    }

    fn set_property_readonly_root(&mut self) -> Result<()> {
        if !self.base.custom_args().root_is_readonly_snapshot {
            debug!("root subvolume stays writable");
            return Ok(());
        }
        let toplevel = self.toplevel()?.clone();
        let mounted_here = !toplevel.is_mounted()?;
        if mounted_here {
            self.mount_volumes()?;
        }
        let result = self.base.run(
            Cmd::new("btrfs")
                .args(["property", "set"])
                .arg_path(&Self::root_subvolume_path(&toplevel))
                .args(["ro", "true"])
                .error_msg("btrfs property set failed"),
        );
        if mounted_here && !self.umount_volumes()? {
            warn!("{} still busy", toplevel.mountpoint.display());
        }
        result.map(|_| ())
    }

    /// The root tree goes into the root subvolume, nested subvolumes
    /// receive their part of it on the way.
    fn sync_data(&mut self, exclude: &[String]) -> Result<()> {
        let Some(toplevel) = self.toplevel_mount.clone() else {
            return Ok(());
        };
        if !toplevel.is_mounted()? {
            self.mount_volumes()?;
        }
        let synced = self
            .base
            .sync_root_to(&Self::root_subvolume_path(&toplevel), exclude);
        let unmounted = self.umount_volumes();
        synced?;
        if !unmounted? {
            return Err(Error::Setup(format!(
                "{} still busy after sync",
                toplevel.mountpoint.display()
            )));
        }
        Ok(())
    }
}

impl Drop for BtrfsVolumeManager {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("btrfs cleanup failed: {}", e);
        }
    }
}
