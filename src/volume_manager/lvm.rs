//! LVM volume manager: one logical volume with its own filesystem per
//! configured volume.

use super::base::{DeviceMap, VolumeManagerArgs, VolumeManagerBase, VolumeMount};
use super::{Persistency, VolumeManager};
use crate::descriptor::Volume;
use crate::error::{Error, Result};
use crate::process::Cmd;
use crate::storage::{DeviceProvider, MappedDevice};
use crate::system::filesystem::FileSystemBuilder;
use crate::system::mount::MountManager;
use crate::system::path;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_VOLUME_GROUP: &str = "systemVG";

/// Logical volume size argument for `lvcreate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LvSize {
    Mbytes(u64),
    RemainingSpace,
}

/// A created logical volume and where it gets mounted.
#[derive(Debug, Clone)]
struct LogicalVolume {
    name: String,
    realpath: String,
    mount: MountManager,
}

impl LogicalVolume {
    fn device(&self) -> &str {
        self.mount.device.as_deref().unwrap_or_default()
    }
}

pub struct LvmVolumeManager {
    base: VolumeManagerBase,
    volume_group: Option<String>,
    mount_options: String,
    /// Ordered ancestors first.
    logical_volumes: Vec<LogicalVolume>,
}

impl LvmVolumeManager {
    pub fn new(
        device_provider: Box<dyn DeviceProvider>,
        root_dir: &Path,
        volumes: Vec<Volume>,
        custom_args: VolumeManagerArgs,
    ) -> Result<Self> {
        let mount_options = if custom_args.fs_mount_options.is_empty() {
            "defaults".to_string()
        } else {
            custom_args.fs_mount_options.join(",")
        };
        Ok(Self {
            base: VolumeManagerBase::new("lvm", device_provider, root_dir, volumes, custom_args)?,
            volume_group: None,
            mount_options,
            logical_volumes: Vec::new(),
        })
    }

    pub fn volume_group(&self) -> Option<&str> {
        self.volume_group.as_deref()
    }

    fn lvcreate(volume_group: &str, name: &str, size: LvSize) -> Cmd {
        let cmd = Cmd::new("lvcreate").arg("-Zn");
        let cmd = match size {
            LvSize::Mbytes(mbsize) => cmd.arg("-L").arg(mbsize.to_string()),
            LvSize::RemainingSpace => cmd.arg("-l").arg("+100%FREE"),
        };
        cmd.arg("-n").arg(name).arg(volume_group)
    }

    fn create_volume(
        &mut self,
        volume_group: &str,
        volume: &Volume,
        size: LvSize,
        filesystem_name: &str,
    ) -> Result<()> {
        let _enter = self.base.span().clone().entered();
        info!("--> creating LVM volume {} ({:?})", volume.name, size);
        self.base
            .run(Self::lvcreate(volume_group, &volume.name, size).error_msg("lvcreate failed"))?;
        self.base.run(Cmd::new("vgscan").arg("--mknodes"))?;

        self.base
            .apply_attributes_on_volume(self.base.root_dir(), volume)?;

        let device = format!("/dev/{}/{}", volume_group, volume.name);
        let label = if volume.is_root() {
            Some(self.base.custom_args().root_label())
        } else {
            volume.label.as_deref()
        };
        let mkfs = FileSystemBuilder::new(
            filesystem_name,
            &device,
            &self.base.custom_args().fs_create_options,
        )
        .mkfs_command(label);
        self.base.run(mkfs)?;

        let mountpoint = self
            .base
            .mountpoint()
            .map(|mountpoint| path::join_root(mountpoint, &volume.realpath))
            .ok_or_else(|| Error::Setup("volume mount root not set up".to_string()))?;
        self.logical_volumes.push(LogicalVolume {
            name: volume.name.clone(),
            realpath: volume.realpath.clone(),
            mount: MountManager::new(Some(device), mountpoint),
        });
        Ok(())
    }
}

impl VolumeManager for LvmVolumeManager {
    fn base(&self) -> &VolumeManagerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut VolumeManagerBase {
        &mut self.base
    }

    fn setup(&mut self, name: Option<&str>) -> Result<()> {
        let volume_group = name.unwrap_or(DEFAULT_VOLUME_GROUP).to_string();
        let _enter = self.base.span().clone().entered();
        self.base.setup_mountpoint()?;

        let in_use = self.base.run(
            Cmd::new("vgs")
                .args(["--noheadings", "--select"])
                .arg(format!("vg_name={}", volume_group)),
        )?;
        if !in_use.stdout.trim().is_empty() {
            return Err(Error::VolumeGroupConflict(volume_group));
        }

        info!("Creating volume group {}", volume_group);
        let device = self.base.device().to_string();
        // leftovers of an earlier failed build
        self.base.run(
            Cmd::new("vgremove")
                .arg("--force")
                .arg(&volume_group)
                .allow_fail(),
        )?;
        self.base
            .run(Cmd::new("pvcreate").arg(&device).error_msg("pvcreate failed"))?;
        self.base.run(
            Cmd::new("vgcreate")
                .arg(&volume_group)
                .arg(&device)
                .error_msg("vgcreate failed"),
        )?;
        self.volume_group = Some(volume_group);
        Ok(())
    }

    fn create_volumes(&mut self, filesystem_name: &str) -> Result<()> {
        let volume_group = self
            .volume_group
            .clone()
            .ok_or_else(|| Error::Setup("no volume group set up".to_string()))?;
        if self.base.mountpoint().is_none() {
            return Err(Error::Setup("volume mount root not set up".to_string()));
        }

        self.base.create_volume_paths_in_root_dir()?;
        let canonical = self.base.get_canonical_volume_list();
        let all_volumes = self.base.volumes().to_vec();
        let image_type = self.base.custom_args().image_type;

        for volume in &canonical.volumes {
            let mbsize =
                self.base
                    .get_volume_mbsize(volume, &all_volumes, filesystem_name, image_type)?;
            self.create_volume(&volume_group, volume, LvSize::Mbytes(mbsize), filesystem_name)?;
        }
        if let Some(volume) = &canonical.full_size_volume {
            self.create_volume(&volume_group, volume, LvSize::RemainingSpace, filesystem_name)?;
        }

        // a fullsize root is created last but has to be mounted first
        self.logical_volumes
            .sort_by_key(|volume| path::depth(&volume.realpath));
        Ok(())
    }

    fn get_fstab(&self, _persistency: Persistency, filesystem_name: &str) -> Result<Vec<String>> {
        Ok(self
            .logical_volumes
            .iter()
            .filter(|volume| path::depth(&volume.realpath) > 0)
            .map(|volume| {
                format!(
                    "{} {} {} {} 1 2",
                    volume.device(),
                    volume.realpath,
                    filesystem_name,
                    self.mount_options
                )
            })
            .collect())
    }

    fn get_volumes(&self) -> BTreeMap<String, VolumeMount> {
        self.logical_volumes
            .iter()
            .filter(|volume| path::depth(&volume.realpath) > 0)
            .map(|volume| {
                (
                    volume.realpath.trim_start_matches('/').to_string(),
                    VolumeMount {
                        volume_options: self.mount_options.clone(),
                        volume_device: volume.device().to_string(),
                    },
                )
            })
            .collect()
    }

    fn mount_volumes(&mut self) -> Result<()> {
        let options = [self.mount_options.clone()];
        for volume in &self.logical_volumes {
            path::create(&volume.mount.mountpoint)?;
            volume.mount.mount(self.base.runner(), &options)?;
        }
        Ok(())
    }

    fn umount_volumes(&mut self) -> Result<bool> {
        let mut all_unmounted = true;
        for volume in self.logical_volumes.iter().rev() {
            if !volume.mount.umount(self.base.runner())? {
                all_unmounted = false;
            }
        }
        Ok(all_unmounted)
    }

    fn cleanup(&mut self) -> Result<()> {
        let unmounted = self.umount_volumes()?;
        self.base.release_mountpoint(unmounted)?;

        if let Some(volume_group) = self.volume_group.take() {
            let _enter = self.base.span().clone().entered();
            let deactivate = Cmd::new("vgchange")
                .arg("-an")
                .arg(&volume_group)
                .allow_fail();
            match self.base.run(deactivate) {
                Ok(result) if result.success() => {}
                Ok(result) => warn!(
                    "volume group {} still active: {}",
                    volume_group,
                    result.stderr.trim()
                ),
                Err(e) => warn!("could not deactivate volume group {}: {}", volume_group, e),
            }
        }
        Ok(())
    }

    /// The root entry points at the volume holding `/`, every logical
    /// volume is listed by name.
    fn get_device(&self) -> DeviceMap<'_> {
        let mut devices = self.base.get_device();
        for volume in &self.logical_volumes {
            if volume.realpath == "/" {
                devices.insert(
                    "root".to_string(),
                    MappedDevice::new(volume.device(), &self.base),
                );
            }
            devices.insert(
                volume.name.clone(),
                MappedDevice::new(volume.device(), &self.base),
            );
        }
        devices
    }
}

impl Drop for LvmVolumeManager {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("LVM cleanup failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingRunner;
    use crate::system::size::MIN_VOLUME_MBYTES;
    use std::path::PathBuf;
    use crate::storage::BlockDevice;
    use tempfile::TempDir;

    fn manager(root: &Path, args: VolumeManagerArgs) -> LvmVolumeManager {
        LvmVolumeManager::new(
            Box::new(BlockDevice::new("/dev/storage", false)),
            root,
            vec![],
            args,
        )
        .unwrap()
    }

    fn volume(name: &str, realpath: &str, size: Option<&str>, label: Option<&str>) -> Volume {
        Volume {
            name: name.into(),
            realpath: realpath.into(),
            size: size.map(str::to_string),
            fullsize: false,
            label: label.map(str::to_string),
            attributes: vec![],
        }
    }

    fn recorded(
        root: &Path,
        volumes: Vec<Volume>,
        args: VolumeManagerArgs,
    ) -> (LvmVolumeManager, RecordingRunner) {
        let runner = RecordingRunner::default();
        let mut manager = LvmVolumeManager::new(
            Box::new(BlockDevice::new("/dev/storage", true)),
            root,
            volumes,
            args,
        )
        .unwrap();
        manager.base.set_command_runner(Box::new(runner.clone()));
        (manager, runner)
    }

    fn register(manager: &mut LvmVolumeManager, name: &str, realpath: &str) {
        let mountpoint = path::join_root(manager.base.mountpoint().unwrap(), realpath);
        manager.logical_volumes.push(LogicalVolume {
            name: name.into(),
            realpath: realpath.into(),
            mount: MountManager::new(Some(format!("/dev/systemVG/{}", name)), mountpoint),
        });
    }

    #[test]
    fn test_mount_options_default() {
        let root = TempDir::new().unwrap();
        assert_eq!(
            manager(root.path(), VolumeManagerArgs::default()).mount_options,
            "defaults"
        );
    }

    #[test]
    fn test_mount_options_joined() {
        let root = TempDir::new().unwrap();
        let args = VolumeManagerArgs {
            fs_mount_options: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        };
        assert_eq!(manager(root.path(), args).mount_options, "a,b,c");
    }

    #[test]
    fn test_lvcreate_command() {
        assert_eq!(
            LvmVolumeManager::lvcreate("systemVG", "LVRoot", LvSize::Mbytes(100)).command_line(),
            "lvcreate -Zn -L 100 -n LVRoot systemVG"
        );
        assert_eq!(
            LvmVolumeManager::lvcreate("systemVG", "LVhome", LvSize::RemainingSpace)
                .command_line(),
            "lvcreate -Zn -l +100%FREE -n LVhome systemVG"
        );
    }

    #[test]
    fn test_setup_creates_volume_group() {
        let root = TempDir::new().unwrap();
        let (mut manager, runner) = recorded(root.path(), vec![], VolumeManagerArgs::default());
        manager.setup(Some("volume_group")).unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "vgs --noheadings --select vg_name=volume_group",
                "vgremove --force volume_group",
                "pvcreate /dev/storage",
                "vgcreate volume_group /dev/storage",
            ]
        );
        assert_eq!(manager.volume_group(), Some("volume_group"));
    }

    #[test]
    fn test_setup_volume_group_host_conflict() {
        let root = TempDir::new().unwrap();
        let (mut manager, runner) = recorded(root.path(), vec![], VolumeManagerArgs::default());
        runner.respond("vgs", "  systemVG   1   0   0 wz--n- 20.00g 20.00g\n");

        match manager.setup(None) {
            Err(Error::VolumeGroupConflict(name)) => assert_eq!(name, "systemVG"),
            other => panic!("expected volume group conflict, got {:?}", other.err()),
        }
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(manager.volume_group(), None);
    }

    #[test]
    fn test_create_volumes() {
        let root = TempDir::new().unwrap();
        let mut home = volume("LVhome", "/home", None, None);
        home.fullsize = true;
        let volumes = vec![
            volume("LVRoot", "/", Some("freespace:100"), None),
            volume("LVetc", "/etc", Some("freespace:200"), Some("etc")),
            volume("myvol", "/data", Some("size:500"), None),
            home,
        ];
        let args = VolumeManagerArgs {
            fs_mount_options: vec!["a,b,c".into()],
            ..Default::default()
        };
        let (mut manager, runner) = recorded(root.path(), volumes, args);
        manager.setup(Some("volume_group")).unwrap();
        let setup_calls = runner.calls().len();
        manager.create_volumes("ext3").unwrap();

        // empty root tree: freespace volumes get the requested space plus
        // the minimum volume size
        let root_size = 100 + MIN_VOLUME_MBYTES;
        let etc_size = 200 + MIN_VOLUME_MBYTES;
        assert_eq!(
            runner.calls()[setup_calls..],
            [
                format!("lvcreate -Zn -L {root_size} -n LVRoot volume_group"),
                "vgscan --mknodes".to_string(),
                "mkfs.ext3 -L ROOT /dev/volume_group/LVRoot".to_string(),
                "lvcreate -Zn -L 500 -n myvol volume_group".to_string(),
                "vgscan --mknodes".to_string(),
                "mkfs.ext3 /dev/volume_group/myvol".to_string(),
                format!("lvcreate -Zn -L {etc_size} -n LVetc volume_group"),
                "vgscan --mknodes".to_string(),
                "mkfs.ext3 -L etc /dev/volume_group/LVetc".to_string(),
                "lvcreate -Zn -l +100%FREE -n LVhome volume_group".to_string(),
                "vgscan --mknodes".to_string(),
                "mkfs.ext3 /dev/volume_group/LVhome".to_string(),
            ]
        );
        for dir in ["etc", "data", "home"] {
            assert!(root.path().join(dir).is_dir());
        }

        let mountpoint = manager.base.mountpoint().unwrap().to_path_buf();
        let mounts: Vec<(String, PathBuf)> = manager
            .logical_volumes
            .iter()
            .map(|volume| (volume.device().to_string(), volume.mount.mountpoint.clone()))
            .collect();
        assert_eq!(
            mounts,
            vec![
                ("/dev/volume_group/LVRoot".to_string(), mountpoint.clone()),
                ("/dev/volume_group/myvol".to_string(), mountpoint.join("data")),
                ("/dev/volume_group/LVetc".to_string(), mountpoint.join("etc")),
                ("/dev/volume_group/LVhome".to_string(), mountpoint.join("home")),
            ]
        );
    }

    #[test]
    fn test_fullsize_root_is_mounted_first() {
        let root = TempDir::new().unwrap();
        let mut lvroot = volume("LVRoot", "/", None, None);
        lvroot.fullsize = true;
        let volumes = vec![lvroot, volume("LVvar", "/var", Some("size:100"), None)];
        let (mut manager, runner) = recorded(root.path(), volumes, VolumeManagerArgs::default());
        manager.setup(None).unwrap();
        manager.create_volumes("xfs").unwrap();
        let created = runner.calls().len();

        manager.mount_volumes().unwrap();
        let mountpoint = manager.base.mountpoint().unwrap().display().to_string();
        assert_eq!(
            runner.calls()[created..],
            [
                format!("mount -o defaults /dev/systemVG/LVRoot {mountpoint}"),
                format!("mount -o defaults /dev/systemVG/LVvar {mountpoint}/var"),
            ]
        );
    }

    #[test]
    fn test_cleanup_deactivates_volume_group() {
        let root = TempDir::new().unwrap();
        let (mut manager, runner) = recorded(root.path(), vec![], VolumeManagerArgs::default());
        manager.setup(None).unwrap();
        manager.cleanup().unwrap();

        assert_eq!(runner.calls().last().unwrap(), "vgchange -an systemVG");
        assert_eq!(manager.volume_group(), None);
    }

    #[test]
    fn test_create_volumes_requires_volume_group() {
        let root = TempDir::new().unwrap();
        let mut manager = manager(root.path(), VolumeManagerArgs::default());
        assert!(matches!(
            manager.create_volumes("ext3"),
            Err(Error::Setup(_))
        ));
    }

    #[test]
    fn test_fstab_and_volumes_skip_root() {
        let root = TempDir::new().unwrap();
        let args = VolumeManagerArgs {
            fs_mount_options: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        };
        let mut manager = manager(root.path(), args);
        manager.base.setup_mountpoint().unwrap();
        register(&mut manager, "LVRoot", "/");
        register(&mut manager, "LVtmp", "/var/tmp");
        register(&mut manager, "LVefi", "/boot/grub2/x86_64-efi");

        assert_eq!(
            manager.get_fstab(Persistency::ByLabel, "ext3").unwrap(),
            vec![
                "/dev/systemVG/LVtmp /var/tmp ext3 a,b,c 1 2",
                "/dev/systemVG/LVefi /boot/grub2/x86_64-efi ext3 a,b,c 1 2",
            ]
        );

        let volumes = manager.get_volumes();
        assert_eq!(volumes.len(), 2);
        assert_eq!(
            volumes["boot/grub2/x86_64-efi"],
            VolumeMount {
                volume_options: "a,b,c".into(),
                volume_device: "/dev/systemVG/LVefi".into(),
            }
        );
    }

    #[test]
    fn test_get_device_maps_root_volume() {
        let root = TempDir::new().unwrap();
        let mut manager = manager(root.path(), VolumeManagerArgs::default());
        manager.base.setup_mountpoint().unwrap();
        register(&mut manager, "LVRoot", "/");
        register(&mut manager, "LVhome", "/home");

        let devices = manager.get_device();
        assert_eq!(devices["root"].get_device(), "/dev/systemVG/LVRoot");
        assert_eq!(devices["LVhome"].get_device(), "/dev/systemVG/LVhome");
        assert!(!devices["LVhome"].is_loop());
    }

    #[test]
    fn test_cleanup_removes_unused_mountpoint() {
        let root = TempDir::new().unwrap();
        let mut manager = manager(root.path(), VolumeManagerArgs::default());
        let mountpoint = manager.base.setup_mountpoint().unwrap().to_path_buf();
        register(&mut manager, "LVhome", "/home");

        manager.cleanup().unwrap();
        assert!(!mountpoint.exists());
        manager.cleanup().unwrap();
    }

    #[test]
    fn test_drop_releases_mountpoint() {
        let root = TempDir::new().unwrap();
        let mut manager = manager(root.path(), VolumeManagerArgs::default());
        let mountpoint = manager.base.setup_mountpoint().unwrap().to_path_buf();
        drop(manager);
        assert!(!mountpoint.exists());
    }
}
