//! Bootloader policy shared by every backend.
//!
//! Every query reads the descriptor again; nothing is cached, so calling
//! the same method twice yields the same answer.

use crate::descriptor::{ApplianceDescriptor, BootTarget, FirmwareType, SUBVOLUME_FILESYSTEM};
use crate::error::Result;
use crate::system::disk_setup::{DiskLayoutInspector, DiskSetup};
use crate::system::path;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, info_span, Span};

/// Backend specific options, passed through unexamined.
pub type CustomArgs = BTreeMap<String, String>;

/// Kernel options of the failsafe boot entry, in order.
pub const FAILSAFE_KERNEL_OPTIONS: &[&str] = &[
    "ide=nodma",
    "apm=off",
    "noresume",
    "edd=off",
    "powersaved=off",
    "nohz=off",
    "highres=off",
    "processor.max_cstate=1",
    "nomodeset",
    "x11failsafe",
];

pub const DEFAULT_BOOT_TIMEOUT: u32 = 10;
pub const DEFAULT_INSTALL_VOLUME_ID: &str = "INSTALL";
pub const DEFAULT_LIVE_VOLUME_ID: &str = "CDROM";

pub struct BootConfigBase {
    descriptor: Arc<ApplianceDescriptor>,
    root_dir: PathBuf,
    custom_args: CustomArgs,
    disk_layout: Option<Box<dyn DiskLayoutInspector>>,
    span: Span,
}

impl BootConfigBase {
    pub fn new(
        backend: &'static str,
        descriptor: Arc<ApplianceDescriptor>,
        root_dir: &Path,
        custom_args: CustomArgs,
    ) -> Self {
        Self {
            descriptor,
            root_dir: root_dir.to_path_buf(),
            custom_args,
            disk_layout: None,
            span: info_span!("bootloader", backend),
        }
    }

    /// Replace the descriptor derived boot partition policy.
    pub fn with_disk_layout(mut self, inspector: Box<dyn DiskLayoutInspector>) -> Self {
        self.disk_layout = Some(inspector);
        self
    }

    pub fn descriptor(&self) -> &ApplianceDescriptor {
        &self.descriptor
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn custom_arg(&self, key: &str) -> Option<&str> {
        self.custom_args.get(key).map(String::as_str)
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    fn need_boot_partition(&self) -> bool {
        match &self.disk_layout {
            Some(inspector) => inspector.need_boot_partition(),
            None => DiskSetup::new(&self.descriptor).need_boot_partition(),
        }
    }

    /// Path of the boot files as seen by the bootloader.
    ///
    /// With a dedicated boot partition the files live at the root of that
    /// partition. A subvolume filesystem with volumes keeps everything
    /// below the `@` subvolume.
    pub fn get_boot_path(&self, target: BootTarget) -> String {
        match target {
            BootTarget::Iso => "/boot".to_string(),
            BootTarget::Disk => {
                if self.need_boot_partition() {
                    return "/".to_string();
                }
                let descriptor = &self.descriptor;
                if descriptor.filesystem() == Some(SUBVOLUME_FILESYSTEM)
                    && !descriptor.get_volumes().is_empty()
                {
                    "/@/boot".to_string()
                } else {
                    "/boot".to_string()
                }
            }
        }
    }

    pub fn get_boot_cmdline(&self) -> String {
        let custom = self
            .descriptor
            .build_type
            .kernelcmdline
            .as_deref()
            .unwrap_or("");
        let mut cmdline = String::new();
        if !custom.is_empty() {
            cmdline.push(' ');
            cmdline.push_str(custom);
        }
        if let Some(root) = self.root_cmdline_parameter(custom) {
            cmdline.push(' ');
            cmdline.push_str(root);
        }
        cmdline.trim().to_string()
    }

    pub fn get_failsafe_boot_cmdline(&self) -> String {
        let cmdline = self.get_boot_cmdline();
        let failsafe = FAILSAFE_KERNEL_OPTIONS.join(" ");
        if cmdline.is_empty() {
            failsafe
        } else {
            format!("{} {}", cmdline, failsafe)
        }
    }

    /// Menu entry booted by default from install media: 0 boots the hard
    /// disk, 1 the installer, 2 the failsafe installer.
    pub fn get_install_image_boot_id(&self) -> u8 {
        match self.descriptor.build_type.installboot.as_deref() {
            Some("failsafe-install") => 2,
            Some("install") => 1,
            _ => 0,
        }
    }

    pub fn get_menu_entry_title(&self, plain: bool) -> String {
        let title = self.display_name();
        if plain {
            return title.to_string();
        }
        format!(
            "{} [ {} ]",
            title,
            self.descriptor.build_type.image.as_str().to_uppercase()
        )
    }

    pub fn get_menu_entry_install_title(&self) -> String {
        self.display_name().to_string()
    }

    fn display_name(&self) -> &str {
        self.descriptor
            .displayname
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.descriptor.name)
    }

    /// The last theme set in any preferences section.
    pub fn get_boot_theme(&self) -> Option<String> {
        self.descriptor
            .get_preferences_sections()
            .iter()
            .filter_map(|p| p.bootloader_theme.as_deref())
            .filter(|theme| !theme.is_empty())
            .last()
            .map(str::to_string)
    }

    pub fn get_boot_timeout_seconds(&self) -> u32 {
        self.descriptor
            .build_type
            .boot_timeout
            .unwrap_or(DEFAULT_BOOT_TIMEOUT)
    }

    pub fn failsafe_boot_entry_requested(&self) -> bool {
        self.descriptor.build_type.installprovidefailsafe != Some(false)
    }

    pub fn get_hypervisor_domain(&self) -> Option<&str> {
        self.descriptor
            .get_build_type_machine_section()
            .and_then(|machine| machine.domain.as_deref())
    }

    pub fn get_install_volume_id(&self) -> String {
        self.volume_id_or(DEFAULT_INSTALL_VOLUME_ID)
    }

    pub fn get_live_volume_id(&self) -> String {
        self.volume_id_or(DEFAULT_LIVE_VOLUME_ID)
    }

    fn volume_id_or(&self, default: &str) -> String {
        self.descriptor
            .build_type
            .volume_id
            .clone()
            .unwrap_or_else(|| default.to_string())
    }

    /// Make a title safe for menu syntaxes that choke on spaces and
    /// square brackets.
    pub fn quote_title(name: &str) -> String {
        name.replace(' ', "_").replace('[', "(").replace(']', ")")
    }

    /// Create `<root_dir>/<subdir>/EFI/BOOT` and return it.
    pub fn create_efi_path(&self, subdir: &str) -> Result<PathBuf> {
        Self::create_efi_path_in(&self.root_dir, subdir)
    }

    pub fn create_efi_path_in(base: &Path, subdir: &str) -> Result<PathBuf> {
        let efi_boot_path = path::join_root(base, subdir).join("EFI/BOOT");
        path::create(&efi_boot_path)?;
        Ok(efi_boot_path)
    }

    fn root_cmdline_parameter(&self, custom_cmdline: &str) -> Option<&'static str> {
        let _enter = self.span.enter();
        if custom_cmdline.contains("root=") {
            info!("Kernel root device explicitly set via kernelcmdline");
            return None;
        }
        match self.descriptor.firmware() {
            FirmwareType::Ec2 => {
                // EC2 guests always see their storage as sda1
                info!("Kernel root device set to /dev/sda1 for ec2 firmware");
                Some("root=/dev/sda1")
            }
            FirmwareType::Ec2Hvm => {
                info!("Kernel root device set to /dev/hda1 for ec2hvm firmware");
                Some("root=/dev/hda1")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ImageType, Machine, Preferences, Volume};
    use crate::error::Error;
    use crate::volume_manager::VolumeManagerKind;
    use tempfile::TempDir;

    struct BootPartition(bool);

    impl DiskLayoutInspector for BootPartition {
        fn need_boot_partition(&self) -> bool {
            self.0
        }
    }

    fn descriptor() -> ApplianceDescriptor {
        let mut descriptor = ApplianceDescriptor {
            name: "appliance".into(),
            displayname: Some("My Appliance".into()),
            ..Default::default()
        };
        descriptor.build_type.image = ImageType::Oem;
        descriptor
    }

    fn volume(realpath: &str) -> Volume {
        Volume {
            name: realpath.into(),
            realpath: realpath.into(),
            size: Some("freespace:100".into()),
            fullsize: false,
            label: None,
            attributes: vec![],
        }
    }

    fn base(descriptor: ApplianceDescriptor) -> BootConfigBase {
        BootConfigBase::new(
            "test",
            Arc::new(descriptor),
            Path::new("/root_dir"),
            CustomArgs::new(),
        )
    }

    #[test]
    fn test_boot_path_with_boot_partition() {
        let mut d = descriptor();
        d.build_type.filesystem = Some("btrfs".into());
        d.volumes = vec![volume("/var")];
        let config = base(d).with_disk_layout(Box::new(BootPartition(true)));
        assert_eq!(config.get_boot_path(BootTarget::Disk), "/");
    }

    #[test]
    fn test_boot_path_btrfs_with_volumes() {
        let mut d = descriptor();
        d.build_type.filesystem = Some("btrfs".into());
        d.volumes = vec![volume("/var")];
        let config = base(d).with_disk_layout(Box::new(BootPartition(false)));
        assert_eq!(config.get_boot_path(BootTarget::Disk), "/@/boot");
    }

    #[test]
    fn test_boot_path_btrfs_without_volumes() {
        let mut d = descriptor();
        d.build_type.filesystem = Some("btrfs".into());
        let config = base(d);
        assert_eq!(config.get_boot_path(BootTarget::Disk), "/boot");
    }

    #[test]
    fn test_boot_path_ext4_with_volumes() {
        let mut d = descriptor();
        d.build_type.filesystem = Some("ext4".into());
        d.volumes = vec![volume("/var")];
        let config = base(d);
        assert_eq!(config.get_boot_path(BootTarget::Disk), "/boot");
    }

    #[test]
    fn test_boot_path_iso() {
        let mut d = descriptor();
        d.build_type.filesystem = Some("btrfs".into());
        d.volumes = vec![volume("/var")];
        let config = base(d).with_disk_layout(Box::new(BootPartition(true)));
        assert_eq!(config.get_boot_path(BootTarget::Iso), "/boot");
    }

    #[test]
    fn test_boot_path_invalid_target() {
        let err = "usb".parse::<BootTarget>().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_boot_path_lvm_uses_boot_partition_policy() {
        let mut d = descriptor();
        d.build_type.volume_manager = Some(VolumeManagerKind::Lvm);
        assert_eq!(base(d).get_boot_path(BootTarget::Disk), "/");
    }

    #[test]
    fn test_cmdline_explicit_root_is_kept() {
        let mut d = descriptor();
        d.build_type.firmware = Some(FirmwareType::Ec2);
        d.build_type.kernelcmdline = Some("root=/dev/xvda1 quiet".into());
        assert_eq!(base(d).get_boot_cmdline(), "root=/dev/xvda1 quiet");
    }

    #[test]
    fn test_cmdline_ec2_root() {
        let mut d = descriptor();
        d.build_type.firmware = Some(FirmwareType::Ec2);
        d.build_type.kernelcmdline = Some("quiet".into());
        let cmdline = base(d).get_boot_cmdline();
        assert_eq!(cmdline, "quiet root=/dev/sda1");
        assert_eq!(cmdline.matches("root=").count(), 1);
    }

    #[test]
    fn test_cmdline_ec2hvm_root() {
        let mut d = descriptor();
        d.build_type.firmware = Some(FirmwareType::Ec2Hvm);
        assert_eq!(base(d).get_boot_cmdline(), "root=/dev/hda1");
    }

    #[test]
    fn test_cmdline_other_firmware_adds_nothing() {
        let mut d = descriptor();
        d.build_type.firmware = Some(FirmwareType::Efi);
        d.build_type.kernelcmdline = Some("  splash  ".into());
        assert_eq!(base(d).get_boot_cmdline(), "splash");
        assert_eq!(base(descriptor()).get_boot_cmdline(), "");
    }

    #[test]
    fn test_failsafe_cmdline() {
        let mut d = descriptor();
        d.build_type.kernelcmdline = Some("splash".into());
        assert_eq!(
            base(d).get_failsafe_boot_cmdline(),
            "splash ide=nodma apm=off noresume edd=off powersaved=off nohz=off \
             highres=off processor.max_cstate=1 nomodeset x11failsafe"
        );
    }

    #[test]
    fn test_install_image_boot_id() {
        let mut d = descriptor();
        assert_eq!(base(d.clone()).get_install_image_boot_id(), 0);
        d.build_type.installboot = Some("install".into());
        assert_eq!(base(d.clone()).get_install_image_boot_id(), 1);
        d.build_type.installboot = Some("failsafe-install".into());
        assert_eq!(base(d.clone()).get_install_image_boot_id(), 2);
        d.build_type.installboot = Some("harddisk".into());
        assert_eq!(base(d).get_install_image_boot_id(), 0);
    }

    #[test]
    fn test_menu_entry_titles() {
        let config = base(descriptor());
        assert_eq!(config.get_menu_entry_title(false), "My Appliance [ OEM ]");
        assert_eq!(config.get_menu_entry_title(true), "My Appliance");
        assert_eq!(config.get_menu_entry_install_title(), "My Appliance");

        let mut d = descriptor();
        d.displayname = None;
        let config = base(d);
        assert_eq!(config.get_menu_entry_title(false), "appliance [ OEM ]");
        assert_eq!(config.get_menu_entry_install_title(), "appliance");
    }

    #[test]
    fn test_queries_are_deterministic() {
        let mut d = descriptor();
        d.build_type.firmware = Some(FirmwareType::Ec2);
        let config = base(d);
        assert_eq!(config.get_boot_cmdline(), config.get_boot_cmdline());
        assert_eq!(
            config.get_menu_entry_title(false),
            config.get_menu_entry_title(false)
        );
    }

    #[test]
    fn test_boot_theme_last_section_wins() {
        let mut d = descriptor();
        assert_eq!(base(d.clone()).get_boot_theme(), None);
        d.preferences = vec![
            Preferences {
                bootloader_theme: Some("first".into()),
            },
            Preferences {
                bootloader_theme: Some("second".into()),
            },
            Preferences {
                bootloader_theme: None,
            },
        ];
        assert_eq!(base(d).get_boot_theme().as_deref(), Some("second"));
    }

    #[test]
    fn test_timeout_failsafe_and_domain() {
        let mut d = descriptor();
        let config = base(d.clone());
        assert_eq!(config.get_boot_timeout_seconds(), 10);
        assert!(config.failsafe_boot_entry_requested());
        assert_eq!(config.get_hypervisor_domain(), None);

        d.build_type.boot_timeout = Some(3);
        d.build_type.installprovidefailsafe = Some(false);
        d.build_type.machine = Some(Machine {
            domain: Some("dom0".into()),
        });
        let config = base(d);
        assert_eq!(config.get_boot_timeout_seconds(), 3);
        assert!(!config.failsafe_boot_entry_requested());
        assert_eq!(config.get_hypervisor_domain(), Some("dom0"));
    }

    #[test]
    fn test_volume_ids() {
        let mut d = descriptor();
        let config = base(d.clone());
        assert_eq!(config.get_install_volume_id(), "INSTALL");
        assert_eq!(config.get_live_volume_id(), "CDROM");
        d.build_type.volume_id = Some("APPLIANCE".into());
        assert_eq!(base(d).get_install_volume_id(), "APPLIANCE");
    }

    #[test]
    fn test_quote_title() {
        assert_eq!(BootConfigBase::quote_title("My [Image]"), "My_(Image)");
    }

    #[test]
    fn test_create_efi_path() {
        let temp = TempDir::new().unwrap();
        let config = BootConfigBase::new(
            "test",
            Arc::new(descriptor()),
            temp.path(),
            CustomArgs::new(),
        );
        let efi = config.create_efi_path("boot/efi").unwrap();
        assert_eq!(efi, temp.path().join("boot/efi/EFI/BOOT"));
        assert!(efi.is_dir());
        assert_eq!(config.create_efi_path("boot/efi").unwrap(), efi);
    }
}
