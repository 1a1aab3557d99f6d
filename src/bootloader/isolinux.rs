//! isolinux backend for legacy BIOS ISO boot.
//!
//! isolinux only boots ISO media. Disk configuration and disk boot images
//! are reported as unimplemented.

use super::base::{BootConfigBase, CustomArgs};
use super::BootLoaderConfig;
use crate::descriptor::ApplianceDescriptor;
use crate::error::{Error, Result};
use crate::system::identifier::SystemIdentifier;
use crate::system::path;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Directories below the lookup root that may hold the syslinux payload.
const LOADER_SOURCE_DIRS: &[&str] = &[
    "usr/share/syslinux",
    "usr/lib/syslinux/modules/bios",
    "usr/lib/ISOLINUX",
];

const ISOLINUX_BIN: &str = "isolinux.bin";
const HARDDISK_LABEL: &str = "Boot_from_Hard_Disk";

pub struct IsolinuxConfig {
    base: BootConfigBase,
    boot_dir: PathBuf,
    loader_dir: PathBuf,
    config: Option<String>,
}

impl IsolinuxConfig {
    /// Recognized custom args: `arch`.
    pub fn new(
        descriptor: Arc<ApplianceDescriptor>,
        root_dir: &Path,
        boot_dir: Option<&Path>,
        custom_args: CustomArgs,
    ) -> Self {
        let base = BootConfigBase::new("isolinux", descriptor, root_dir, custom_args);
        let boot_dir = boot_dir.unwrap_or(root_dir).to_path_buf();
        let arch = base.custom_arg("arch").unwrap_or(std::env::consts::ARCH);
        let loader_dir = boot_dir.join("boot").join(arch).join("loader");
        Self {
            base,
            boot_dir,
            loader_dir,
            config: None,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.loader_dir.join("isolinux.cfg")
    }

    pub fn config(&self) -> Option<&str> {
        self.config.as_deref()
    }

    fn entry(
        label: &str,
        hypervisor: Option<&str>,
        kernel: &str,
        initrd: &str,
        cmdline: &str,
    ) -> String {
        let mut entry = format!("LABEL {}\n", label);
        match hypervisor {
            Some(hypervisor) => {
                entry.push_str("  kernel mboot.c32\n");
                let _ = writeln!(
                    entry,
                    "  append {} --- {} {} --- {}",
                    hypervisor, kernel, cmdline, initrd
                );
            }
            None => {
                let _ = writeln!(entry, "  kernel {}", kernel);
                let _ = writeln!(entry, "  append initrd={} {}", initrd, cmdline);
            }
        }
        entry
    }

    fn setup_media_config(
        &mut self,
        mbrid: &SystemIdentifier,
        hypervisor: Option<&str>,
        kernel: &str,
        initrd: &str,
        install: bool,
    ) -> Result<()> {
        let failsafe = self.base.failsafe_boot_entry_requested();
        let (title, extra) = if install {
            (self.base.get_menu_entry_install_title(), "cdinst=1".to_string())
        } else {
            (
                self.base.get_menu_entry_title(true),
                format!("root=live:CDLABEL={}", self.base.get_live_volume_id()),
            )
        };
        let label = BootConfigBase::quote_title(&title);
        let failsafe_label = BootConfigBase::quote_title(&format!("Failsafe -- {}", title));

        let default_label = if install {
            match self.base.get_install_image_boot_id() {
                1 => label.as_str(),
                2 if failsafe => failsafe_label.as_str(),
                2 => label.as_str(),
                _ => HARDDISK_LABEL,
            }
        } else {
            label.as_str()
        };

        let mut config = format!(
            "DEFAULT {}\nTIMEOUT {}\nPROMPT 1\n",
            default_label,
            // isolinux counts in tenths of a second
            self.base.get_boot_timeout_seconds().saturating_mul(10)
        );
        if let Some(theme) = self.base.get_boot_theme() {
            let _ = writeln!(config, "# theme: {}", theme);
            config.push_str("UI gfxboot bootlogo isolinux.msg\n");
        }
        let _ = writeln!(config, "# mbrid: {}", mbrid.get_id());
        if install {
            let _ = write!(config, "LABEL {}\n  localboot 0x80\n", HARDDISK_LABEL);
        }
        let cmdline = format!("{} {}", self.base.get_boot_cmdline(), extra);
        config.push_str(&Self::entry(&label, hypervisor, kernel, initrd, cmdline.trim()));
        if failsafe {
            let cmdline = format!("{} {}", self.base.get_failsafe_boot_cmdline(), extra);
            config.push_str(&Self::entry(
                &failsafe_label,
                hypervisor,
                kernel,
                initrd,
                cmdline.trim(),
            ));
        }
        self.config = Some(config);
        Ok(())
    }

    fn find_loader_source(&self, lookup_root: &Path) -> Option<PathBuf> {
        LOADER_SOURCE_DIRS
            .iter()
            .map(|dir| lookup_root.join(dir))
            .find(|dir| dir.join(ISOLINUX_BIN).is_file())
    }

    fn setup_media_boot_images(
        &self,
        mbrid: &SystemIdentifier,
        lookup_path: Option<&Path>,
    ) -> Result<()> {
        let lookup_root = lookup_path.unwrap_or(self.base.root_dir());
        let source = self.find_loader_source(lookup_root).ok_or_else(|| {
            Error::Setup(format!(
                "{} not found below {}",
                ISOLINUX_BIN,
                lookup_root.display()
            ))
        })?;
        path::create(&self.loader_dir)?;

        let entries = fs::read_dir(&source).map_err(|e| Error::io(&source, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&source, e))?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if name_str == ISOLINUX_BIN || name_str.ends_with(".c32") {
                let target = self.loader_dir.join(&name);
                debug!("Copying {} to {}", entry.path().display(), target.display());
                fs::copy(entry.path(), &target).map_err(|e| Error::io(entry.path(), e))?;
            }
        }
        mbrid.write(&self.boot_dir.join("boot/mbrid"))
    }
}

impl BootLoaderConfig for IsolinuxConfig {
    fn base(&self) -> &BootConfigBase {
        &self.base
    }

    fn write(&mut self) -> Result<()> {
        let config = self
            .config
            .as_deref()
            .ok_or_else(|| Error::Setup("no isolinux configuration has been set up".into()))?;
        path::create(&self.loader_dir)?;
        let config_file = self.config_file();
        info!("Writing {}", config_file.display());
        fs::write(&config_file, config).map_err(|e| Error::io(&config_file, e))
    }

    fn setup_disk_image_config(
        &mut self,
        _boot_uuid: &str,
        _hypervisor: Option<&str>,
        _kernel: &str,
        _initrd: &str,
    ) -> Result<()> {
        Err(Error::Unimplemented {
            backend: "isolinux",
            operation: "setup_disk_image_config",
        })
    }

    fn setup_install_image_config(
        &mut self,
        mbrid: &SystemIdentifier,
        hypervisor: Option<&str>,
        kernel: &str,
        initrd: &str,
    ) -> Result<()> {
        self.setup_media_config(mbrid, hypervisor, kernel, initrd, true)
    }

    fn setup_live_image_config(
        &mut self,
        mbrid: &SystemIdentifier,
        hypervisor: Option<&str>,
        kernel: &str,
        initrd: &str,
    ) -> Result<()> {
        self.setup_media_config(mbrid, hypervisor, kernel, initrd, false)
    }

    fn setup_disk_boot_images(&mut self, _boot_uuid: &str, _lookup_path: Option<&Path>) -> Result<()> {
        Err(Error::Unimplemented {
            backend: "isolinux",
            operation: "setup_disk_boot_images",
        })
    }

    fn setup_install_boot_images(
        &mut self,
        mbrid: &SystemIdentifier,
        lookup_path: Option<&Path>,
    ) -> Result<()> {
        self.setup_media_boot_images(mbrid, lookup_path)
    }

    fn setup_live_boot_images(
        &mut self,
        mbrid: &SystemIdentifier,
        lookup_path: Option<&Path>,
    ) -> Result<()> {
        self.setup_media_boot_images(mbrid, lookup_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ImageType;
    use tempfile::TempDir;

    fn descriptor() -> ApplianceDescriptor {
        let mut descriptor = ApplianceDescriptor {
            name: "appliance".into(),
            displayname: Some("My [Appliance]".into()),
            ..Default::default()
        };
        descriptor.build_type.image = ImageType::Iso;
        descriptor
    }

    fn isolinux(descriptor: ApplianceDescriptor, root: &Path, media: &Path) -> IsolinuxConfig {
        let mut args = CustomArgs::new();
        args.insert("arch".into(), "x86_64".into());
        IsolinuxConfig::new(Arc::new(descriptor), root, Some(media), args)
    }

    #[test]
    fn test_install_config() {
        let temp = TempDir::new().unwrap();
        let mut d = descriptor();
        d.build_type.installboot = Some("install".into());
        d.build_type.boot_timeout = Some(5);
        let mut config = isolinux(d, temp.path(), &temp.path().join("media"));
        config
            .setup_install_image_config(&SystemIdentifier::from_value(7), None, "linux", "initrd")
            .unwrap();
        let text = config.config().unwrap();
        assert!(text.starts_with("DEFAULT My_(Appliance)\nTIMEOUT 50\n"));
        assert!(text.contains("LABEL Boot_from_Hard_Disk\n  localboot 0x80\n"));
        assert!(text.contains("LABEL My_(Appliance)\n  kernel linux\n  append initrd=initrd cdinst=1\n"));
        assert!(text.contains("LABEL Failsafe_--_My_(Appliance)\n"));
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let temp = TempDir::new().unwrap();
        let mut d = descriptor();
        d.build_type.boot_timeout = Some(500_000_000);
        let mut config = isolinux(d, temp.path(), &temp.path().join("media"));
        config
            .setup_live_image_config(&SystemIdentifier::from_value(7), None, "linux", "initrd")
            .unwrap();
        assert!(config
            .config()
            .unwrap()
            .contains(&format!("\nTIMEOUT {}\n", u32::MAX)));
    }

    #[test]
    fn test_install_config_defaults_to_harddisk() {
        let temp = TempDir::new().unwrap();
        let mut config = isolinux(descriptor(), temp.path(), &temp.path().join("media"));
        config
            .setup_install_image_config(&SystemIdentifier::from_value(7), None, "linux", "initrd")
            .unwrap();
        assert!(config.config().unwrap().starts_with("DEFAULT Boot_from_Hard_Disk\n"));
    }

    #[test]
    fn test_live_config_with_hypervisor() {
        let temp = TempDir::new().unwrap();
        let mut d = descriptor();
        d.build_type.installprovidefailsafe = Some(false);
        let mut config = isolinux(d, temp.path(), &temp.path().join("media"));
        config
            .setup_live_image_config(
                &SystemIdentifier::from_value(7),
                Some("xen.gz"),
                "linux",
                "initrd",
            )
            .unwrap();
        let text = config.config().unwrap();
        assert!(text.contains("  kernel mboot.c32\n"));
        assert!(text.contains("  append xen.gz --- linux root=live:CDLABEL=CDROM --- initrd\n"));
        assert!(!text.contains("Failsafe"));
    }

    #[test]
    fn test_disk_operations_are_unimplemented() {
        let temp = TempDir::new().unwrap();
        let mut config = isolinux(descriptor(), temp.path(), temp.path());
        assert!(matches!(
            config.setup_disk_image_config("uuid", None, "linux", "initrd"),
            Err(Error::Unimplemented { .. })
        ));
        assert!(matches!(
            config.setup_disk_boot_images("uuid", None),
            Err(Error::Unimplemented { .. })
        ));
    }

    #[test]
    fn test_boot_images_and_write() {
        let temp = TempDir::new().unwrap();
        let lookup = temp.path().join("lookup");
        let syslinux = lookup.join("usr/share/syslinux");
        fs::create_dir_all(&syslinux).unwrap();
        fs::write(syslinux.join("isolinux.bin"), "bin").unwrap();
        fs::write(syslinux.join("ldlinux.c32"), "c32").unwrap();
        fs::write(syslinux.join("README"), "skip").unwrap();

        let media = temp.path().join("media");
        let mut config = isolinux(descriptor(), temp.path(), &media);
        let mbrid = SystemIdentifier::from_value(0xff);
        config.setup_install_boot_images(&mbrid, Some(&lookup)).unwrap();
        config
            .setup_install_image_config(&mbrid, None, "linux", "initrd")
            .unwrap();
        config.write().unwrap();

        let loader = media.join("boot/x86_64/loader");
        assert!(loader.join("isolinux.bin").is_file());
        assert!(loader.join("ldlinux.c32").is_file());
        assert!(!loader.join("README").exists());
        assert!(loader.join("isolinux.cfg").is_file());
        assert_eq!(
            fs::read_to_string(media.join("boot/mbrid")).unwrap(),
            "0x000000ff\n"
        );
    }

    #[test]
    fn test_boot_images_require_isolinux_bin() {
        let temp = TempDir::new().unwrap();
        let mut config = isolinux(descriptor(), temp.path(), &temp.path().join("media"));
        assert!(matches!(
            config.setup_live_boot_images(&SystemIdentifier::from_value(1), None),
            Err(Error::Setup(_))
        ));
    }
}
