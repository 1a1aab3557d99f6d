//! grub2 backend, EFI and BIOS.

use super::base::{BootConfigBase, CustomArgs};
use super::BootLoaderConfig;
use crate::descriptor::{ApplianceDescriptor, BootTarget};
use crate::error::{Error, Result};
use crate::system::identifier::SystemIdentifier;
use crate::system::path;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_DIRECTORY_NAME: &str = "grub2";

/// Naming of EFI binaries for one machine architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EfiArch {
    /// Suffix of the removable media loader, `x64` in `bootx64.efi`.
    suffix: &'static str,
    /// grub platform directory, `x86_64-efi`.
    grub_target: &'static str,
}

impl EfiArch {
    fn for_arch(arch: &str) -> Option<Self> {
        let (suffix, grub_target) = match arch {
            "x86_64" | "amd64" => ("x64", "x86_64-efi"),
            "aarch64" | "arm64" => ("aa64", "arm64-efi"),
            "i386" | "i586" | "i686" | "ix86" => ("ia32", "i386-efi"),
            "riscv64" => ("riscv64", "riscv64-efi"),
            "arm" | "armv7l" | "armv7hl" => ("arm", "arm-efi"),
            _ => return None,
        };
        Some(Self {
            suffix,
            grub_target,
        })
    }

    /// Name firmware loads from `EFI/BOOT` without boot entries.
    fn loader_name(&self) -> String {
        format!("boot{}.efi", self.suffix)
    }

    /// grub EFI images looked up below the lookup root, first match wins.
    fn image_candidates(&self, arch: &str) -> Vec<String> {
        vec![
            format!("usr/share/efi/{}/grub.efi", arch),
            format!("usr/lib/grub2/{}/grub.efi", self.grub_target),
            format!(
                "usr/lib/grub/{}/monolithic/grub{}.efi",
                self.grub_target, self.suffix
            ),
            "boot/efi/EFI/BOOT/grub.efi".to_string(),
        ]
    }
}

/// File on ISO media holding the MBR identifier.
const MBRID_FILE: &str = "boot/mbrid";

pub struct Grub2Config {
    base: BootConfigBase,
    boot_dir: PathBuf,
    directory_name: String,
    arch: String,
    config: Option<String>,
}

impl Grub2Config {
    /// Recognized custom args: `grub_directory_name` (`grub2` or `grub`)
    /// and `arch`.
    pub fn new(
        descriptor: Arc<ApplianceDescriptor>,
        root_dir: &Path,
        boot_dir: Option<&Path>,
        custom_args: CustomArgs,
    ) -> Self {
        let base = BootConfigBase::new("grub2", descriptor, root_dir, custom_args);
        let directory_name = base
            .custom_arg("grub_directory_name")
            .unwrap_or(DEFAULT_DIRECTORY_NAME)
            .to_string();
        let arch = base
            .custom_arg("arch")
            .unwrap_or(std::env::consts::ARCH)
            .to_string();
        Self {
            boot_dir: boot_dir.unwrap_or(root_dir).to_path_buf(),
            base,
            directory_name,
            arch,
            config: None,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.boot_dir
            .join("boot")
            .join(&self.directory_name)
            .join("grub.cfg")
    }

    /// The configuration rendered by the last `setup_*_config` call.
    pub fn config(&self) -> Option<&str> {
        self.config.as_deref()
    }

    fn header(&self, default_entry: u8, boot_path: &str) -> String {
        let mut header = format!(
            "set default={}\nset timeout={}\n",
            default_entry,
            self.base.get_boot_timeout_seconds()
        );
        if let Some(theme) = self.base.get_boot_theme() {
            let _ = writeln!(
                header,
                "set theme={}/themes/{}/theme.txt",
                boot_file(boot_path, &self.directory_name),
                theme
            );
        }
        header
    }

    fn menu_entry(
        &self,
        title: &str,
        search: &str,
        hypervisor: Option<&str>,
        kernel: &str,
        initrd: &str,
        cmdline: &str,
    ) -> String {
        let mut entry = format!("menuentry '{}' --class os {{\n    {}\n", title, search);
        match hypervisor {
            Some(hypervisor) => {
                let _ = writeln!(entry, "    multiboot {}", hypervisor);
                let _ = writeln!(entry, "    module {} {}", kernel, cmdline);
                let _ = writeln!(entry, "    module {}", initrd);
            }
            None => {
                let _ = writeln!(entry, "    linux {} {}", kernel, cmdline);
                let _ = writeln!(entry, "    initrd {}", initrd);
            }
        }
        entry.push_str("}\n");
        entry
    }

    fn media_loader_path(&self) -> String {
        format!("{}/{}/loader", self.base.get_boot_path(BootTarget::Iso), self.arch)
    }

    fn setup_media_config(
        &mut self,
        mbrid: &SystemIdentifier,
        hypervisor: Option<&str>,
        kernel: &str,
        initrd: &str,
        install: bool,
    ) -> Result<()> {
        let loader = self.media_loader_path();
        let kernel = format!("{}/{}", loader, kernel);
        let initrd = format!("{}/{}", loader, initrd);
        let hypervisor = hypervisor.map(|hv| format!("{}/{}", loader, hv));
        let search = format!("search --no-floppy --file --set=root /{}", MBRID_FILE);

        let (default_entry, title, extra) = if install {
            (
                self.base.get_install_image_boot_id(),
                self.base.get_menu_entry_install_title(),
                "cdinst=1".to_string(),
            )
        } else {
            (
                0,
                self.base.get_menu_entry_title(true),
                format!("root=live:CDLABEL={}", self.base.get_live_volume_id()),
            )
        };

        let mut config = self.header(default_entry, "/boot");
        let _ = writeln!(config, "# mbrid: {}", mbrid.get_id());
        if install {
            config.push_str("menuentry 'Boot from Hard Disk' --class os {\n    exit\n}\n");
        }
        let cmdline = join_cmdline(&self.base.get_boot_cmdline(), &extra);
        config.push_str(&self.menu_entry(
            &title,
            &search,
            hypervisor.as_deref(),
            &kernel,
            &initrd,
            &cmdline,
        ));
        if self.base.failsafe_boot_entry_requested() {
            let cmdline = join_cmdline(&self.base.get_failsafe_boot_cmdline(), &extra);
            config.push_str(&self.menu_entry(
                &format!("Failsafe -- {}", title),
                &search,
                hypervisor.as_deref(),
                &kernel,
                &initrd,
                &cmdline,
            ));
        }
        self.config = Some(config);
        Ok(())
    }

    fn efi_arch(&self) -> Result<EfiArch> {
        EfiArch::for_arch(&self.arch).ok_or_else(|| {
            Error::Configuration(format!("no EFI support for architecture {}", self.arch))
        })
    }

    fn find_efi_image(&self, efi_arch: EfiArch, lookup_path: Option<&Path>) -> Option<PathBuf> {
        let lookup_root = lookup_path.unwrap_or(self.base.root_dir());
        efi_arch
            .image_candidates(&self.arch)
            .into_iter()
            .map(|candidate| lookup_root.join(candidate))
            .find(|candidate| candidate.is_file())
    }

    /// Early config next to the EFI loader that hands over to the real one.
    fn setup_efi_loader(
        &self,
        efi_boot_path: &Path,
        search: &str,
        boot_path: &str,
        lookup_path: Option<&Path>,
    ) -> Result<()> {
        let efi_arch = self.efi_arch()?;
        let prefix = boot_file(boot_path, &self.directory_name);
        let early_config = format!(
            "{}\nset prefix=($root){}\nconfigfile ($root){}/grub.cfg\n",
            search, prefix, prefix
        );
        let early_config_file = efi_boot_path.join("grub.cfg");
        fs::write(&early_config_file, early_config)
            .map_err(|e| Error::io(&early_config_file, e))?;

        match self.find_efi_image(efi_arch, lookup_path) {
            Some(image) => {
                let target = efi_boot_path.join(efi_arch.loader_name());
                info!("Using EFI loader {}", image.display());
                fs::copy(&image, &target).map_err(|e| Error::io(&image, e))?;
            }
            None => warn!("No grub EFI image found, EFI/BOOT holds the config only"),
        }
        Ok(())
    }

    fn setup_media_boot_images(
        &self,
        mbrid: &SystemIdentifier,
        lookup_path: Option<&Path>,
    ) -> Result<()> {
        mbrid.write(&self.boot_dir.join(MBRID_FILE))?;
        if self.base.descriptor().firmware().efi_mode() {
            let efi_boot_path = BootConfigBase::create_efi_path_in(&self.boot_dir, "")?;
            let search = format!("search --no-floppy --file --set=root /{}", MBRID_FILE);
            self.setup_efi_loader(&efi_boot_path, &search, "/boot", lookup_path)?;
        }
        Ok(())
    }
}

/// Path of a file below the boot path, `/` meaning a boot partition.
fn boot_file(boot_path: &str, name: &str) -> String {
    format!("{}/{}", boot_path.trim_end_matches('/'), name)
}

fn join_cmdline(cmdline: &str, extra: &str) -> String {
    format!("{} {}", cmdline, extra).trim().to_string()
}

impl BootLoaderConfig for Grub2Config {
    fn base(&self) -> &BootConfigBase {
        &self.base
    }

    fn write(&mut self) -> Result<()> {
        let config = self
            .config
            .as_deref()
            .ok_or_else(|| Error::Setup("no grub2 configuration has been set up".into()))?;
        let config_file = self.config_file();
        if let Some(parent) = config_file.parent() {
            path::create(parent)?;
        }
        info!("Writing {}", config_file.display());
        fs::write(&config_file, config).map_err(|e| Error::io(&config_file, e))
    }

    fn setup_disk_image_config(
        &mut self,
        boot_uuid: &str,
        hypervisor: Option<&str>,
        kernel: &str,
        initrd: &str,
    ) -> Result<()> {
        let boot_path = self.base.get_boot_path(BootTarget::Disk);
        let search = format!("search --no-floppy --fs-uuid --set=root {}", boot_uuid);
        let kernel = boot_file(&boot_path, kernel);
        let initrd = boot_file(&boot_path, initrd);
        let hypervisor = hypervisor.map(|hv| boot_file(&boot_path, hv));
        let title = self.base.get_menu_entry_title(false);

        let mut config = self.header(0, &boot_path);
        config.push_str(&self.menu_entry(
            &title,
            &search,
            hypervisor.as_deref(),
            &kernel,
            &initrd,
            &self.base.get_boot_cmdline(),
        ));
        if self.base.failsafe_boot_entry_requested() {
            config.push_str(&self.menu_entry(
                &format!("Failsafe -- {}", title),
                &search,
                hypervisor.as_deref(),
                &kernel,
                &initrd,
                &self.base.get_failsafe_boot_cmdline(),
            ));
        }
        self.config = Some(config);
        Ok(())
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

    fn setup_disk_boot_images(&mut self, boot_uuid: &str, lookup_path: Option<&Path>) -> Result<()> {
        if !self.base.descriptor().firmware().efi_mode() {
            info!("BIOS boot images are installed by the disk installer");
            return Ok(());
        }
        let boot_path = self.base.get_boot_path(BootTarget::Disk);
        let efi_boot_path = BootConfigBase::create_efi_path_in(&self.boot_dir, "boot/efi")?;
        let search = format!("search --no-floppy --fs-uuid --set=root {}", boot_uuid);
        self.setup_efi_loader(&efi_boot_path, &search, &boot_path, lookup_path)
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
