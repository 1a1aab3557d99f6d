//! Volume layout and size policy shared by every volume manager.

use crate::descriptor::{ImageType, SizeKind, Volume, NO_COPY_ON_WRITE};
use crate::error::{Error, Result};
use crate::storage::{DeviceProvider, MappedDevice};
use crate::process::{Cmd, CommandResult, CommandRunner, HostRunner};
use crate::system::filesystem::disable_copy_on_write_command;
use crate::system::path;
use crate::system::size::{SystemSize, MIN_VOLUME_MBYTES};
use crate::system::sync::{DataCopier, DataSync, SYNC_OPTIONS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span, warn, Span};

/// Prefix of the shared mount root below the system temp directory.
const MOUNTPOINT_PREFIX: &str = "appliance_volumes.";

/// Device nodes by role, `root` always present.
pub type DeviceMap<'a> = BTreeMap<String, MappedDevice<'a>>;

/// Options recognized by every volume manager.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolumeManagerArgs {
    /// Extra flags for filesystem creation, in order.
    pub fs_create_options: Vec<String>,
    /// Extra mount options, in order.
    pub fs_mount_options: Vec<String>,
    /// Label of the filesystem holding `/`, `ROOT` if unset.
    pub root_label: Option<String>,
    /// `oem` images are sized to their content only.
    pub image_type: Option<ImageType>,
    pub root_is_readonly_snapshot: bool,
    pub quota_groups: bool,
}

impl VolumeManagerArgs {
    pub fn root_label(&self) -> &str {
        self.root_label.as_deref().unwrap_or("ROOT")
    }
}

/// Volumes in creation order plus the one that takes the remaining space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalVolumes {
    pub volumes: Vec<Volume>,
    pub full_size_volume: Option<Volume>,
}

/// Options and device of a realized volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeMount {
    pub volume_options: String,
    pub volume_device: String,
}

pub struct VolumeManagerBase {
    device_provider: Box<dyn DeviceProvider>,
    device: String,
    root_dir: PathBuf,
    volumes: Vec<Volume>,
    custom_args: VolumeManagerArgs,
    mountpoint: Option<PathBuf>,
    copier: Box<dyn DataCopier>,
    runner: Box<dyn CommandRunner>,
    span: Span,
}

impl VolumeManagerBase {
    /// Fails with a setup error if `root_dir` does not exist, and with a
    /// configuration error on duplicate volume paths or more than one
    /// fullsize volume.
    pub fn new(
        backend: &'static str,
        device_provider: Box<dyn DeviceProvider>,
        root_dir: &Path,
        volumes: Vec<Volume>,
        custom_args: VolumeManagerArgs,
    ) -> Result<Self> {
        if !root_dir.exists() {
            return Err(Error::Setup(format!(
                "given root directory {} does not exist",
                root_dir.display()
            )));
        }
        validate_volumes(&volumes)?;

        let device = device_provider.get_device();
        Ok(Self {
            device_provider,
            device,
            root_dir: root_dir.to_path_buf(),
            volumes,
            custom_args,
            mountpoint: None,
            copier: Box::new(DataSync),
            runner: Box::new(HostRunner),
            span: info_span!("volume_manager", backend),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn custom_args(&self) -> &VolumeManagerArgs {
        &self.custom_args
    }

    /// The shared mount root, once [`setup_mountpoint`](Self::setup_mountpoint) ran.
    pub fn mountpoint(&self) -> Option<&Path> {
        self.mountpoint.as_deref()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Replace the rsync based copier used by `sync_data`.
    pub fn set_data_copier(&mut self, copier: Box<dyn DataCopier>) {
        self.copier = copier;
    }

    /// Replace the runner executing volume tools on the host.
    pub fn set_command_runner(&mut self, runner: Box<dyn CommandRunner>) {
        self.runner = runner;
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn run(&self, cmd: Cmd) -> Result<CommandResult> {
        self.runner.run(cmd)
    }

    pub fn is_loop(&self) -> bool {
        self.device_provider.is_loop()
    }

    /// The managed device, with this manager recorded as its provider.
    pub fn get_device(&self) -> DeviceMap<'_> {
        let mut devices = DeviceMap::new();
        devices.insert("root".to_string(), MappedDevice::new(self.device.clone(), self));
        devices
    }

    /// Split the volumes into ancestor-first ordered volumes and the
    /// fullsize volume, which has to be created last.
    pub fn get_canonical_volume_list(&self) -> CanonicalVolumes {
        let mut full_size_volume = None;
        let mut by_path = BTreeMap::new();
        for volume in &self.volumes {
            if volume.fullsize {
                full_size_volume = Some(volume.clone());
            } else if !volume.realpath.is_empty() {
                by_path.insert(volume.realpath.as_str(), volume);
            }
        }

        // BTreeMap keys come out sorted, the hierarchy sort keeps that
        // order between siblings
        let sorted: Vec<&str> = by_path.keys().copied().collect();
        let volumes = path::sort_by_hierarchy(&sorted)
            .iter()
            .filter_map(|realpath| by_path.get(realpath.as_str()))
            .map(|volume| (*volume).clone())
            .collect();

        CanonicalVolumes {
            volumes,
            full_size_volume,
        }
    }

    /// Size in MB `volume` needs.
    ///
    /// `oem` images are self-expanding: they get only what the content
    /// needs and grow to their configured size on first boot.
    pub fn get_volume_mbsize(
        &self,
        volume: &Volume,
        all_volumes: &[Volume],
        filesystem_name: &str,
        image_type: Option<ImageType>,
    ) -> Result<u64> {
        let mut size = volume.parsed_size()?;
        if image_type == Some(ImageType::Oem) {
            size.kind = SizeKind::Freespace;
            size.mbsize = 0;
        }

        if size.kind != SizeKind::Freespace {
            return Ok(size.mbsize);
        }

        let exclude: Vec<PathBuf> = all_volumes
            .iter()
            .filter(|other| other.realpath != volume.realpath)
            .filter(|other| volume.is_root() || volume.is_ancestor_of(other))
            .map(|other| path::join_root(&self.root_dir, &other.realpath))
            .collect();

        let system_size = SystemSize::new(path::join_root(&self.root_dir, &volume.realpath));
        let content = system_size.accumulate_mbyte_file_sizes(&exclude)?;
        let overhead = system_size.overhead_for(content, filesystem_name)?;
        let mbsize = content
            .checked_add(overhead)
            .and_then(|mbytes| mbytes.checked_add(MIN_VOLUME_MBYTES))
            .and_then(|mbytes| mbytes.checked_add(size.mbsize))
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "size of volume {} exceeds the addressable range",
                    volume.realpath
                ))
            })?;

        self.span.in_scope(|| {
            debug!(
                "{}: {} MB content, {} MB {} overhead, {} MB requested",
                volume.realpath, content, overhead, filesystem_name, size.mbsize
            )
        });
        Ok(mbsize)
    }

    /// Make sure every volume path exists in the root tree, so it exists
    /// in the synced image too.
    pub fn create_volume_paths_in_root_dir(&self) -> Result<()> {
        for volume in &self.volumes {
            if volume.realpath.is_empty() || volume.is_root() {
                continue;
            }
            let volume_path = path::join_root(&self.root_dir, &volume.realpath);
            if !volume_path.exists() {
                path::create(&volume_path)?;
            }
        }
        Ok(())
    }

    pub fn apply_attributes_on_volume(&self, toplevel: &Path, volume: &Volume) -> Result<()> {
        let _enter = self.span.enter();
        for attribute in &volume.attributes {
            if attribute == NO_COPY_ON_WRITE {
                info!("--> setting {} for {}", attribute, volume.realpath);
                self.run(disable_copy_on_write_command(&path::join_root(
                    toplevel,
                    &volume.realpath,
                )))?;
            } else {
                debug!("ignoring unknown volume attribute {}", attribute);
            }
        }
        Ok(())
    }

    /// Allocate the private directory all volumes get mounted below.
    pub fn setup_mountpoint(&mut self) -> Result<&Path> {
        let temp_dir = std::env::temp_dir();
        let dir = tempfile::Builder::new()
            .prefix(MOUNTPOINT_PREFIX)
            .keep(true)
            .tempdir()
            .map_err(|e| Error::io(&temp_dir, e))?;
        let mountpoint = dir.path().to_path_buf();
        self.span
            .in_scope(|| debug!("volume mount root {}", mountpoint.display()));
        Ok(self.mountpoint.insert(mountpoint).as_path())
    }

    /// Remove the shared mount root. With `unmounted == false` something is
    /// still mounted below it, so the directory is left in place.
    pub fn release_mountpoint(&mut self, unmounted: bool) -> Result<()> {
        let Some(mountpoint) = self.mountpoint.take() else {
            return Ok(());
        };
        if unmounted {
            path::wipe(&mountpoint)
        } else {
            self.span.in_scope(|| {
                warn!(
                    "volumes below {} still busy, leaving it in place",
                    mountpoint.display()
                )
            });
            Ok(())
        }
    }

    /// Copy the root tree to `target` with the configured copier.
    pub fn sync_root_to(&self, target: &Path, exclude: &[String]) -> Result<()> {
        self.copier.sync(&self.root_dir, target, SYNC_OPTIONS, exclude)
    }
}

impl DeviceProvider for VolumeManagerBase {
    fn get_device(&self) -> String {
        self.device.clone()
    }

    fn is_loop(&self) -> bool {
        self.device_provider.is_loop()
    }
}

fn validate_volumes(volumes: &[Volume]) -> Result<()> {
    let mut seen = HashSet::new();
    for volume in volumes {
        if !seen.insert(volume.realpath.as_str()) {
            return Err(Error::Configuration(format!(
                "volume path {} configured more than once",
                volume.realpath
            )));
        }
    }
    let fullsize: Vec<&str> = volumes
        .iter()
        .filter(|v| v.fullsize)
        .map(|v| v.name.as_str())
        .collect();
    if fullsize.len() > 1 {
        return Err(Error::Configuration(format!(
            "only one volume can take the remaining space, got: {}",
            fullsize.join(", ")
        )));
    }
    Ok(())
}
