use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use appliance_builder::bootloader::{BootConfigBase, CustomArgs};
use appliance_builder::descriptor::{ApplianceDescriptor, BootTarget};
use appliance_builder::logging;
use appliance_builder::storage::BlockDevice;
use appliance_builder::volume_manager::{VolumeManagerArgs, VolumeManagerBase};
use serde::Serialize;

/// Placeholder device; planning never touches block devices.
const PLAN_DEVICE: &str = "/dev/null";

#[derive(Serialize)]
struct BootPlan {
    disk_boot_path: String,
    iso_boot_path: String,
    cmdline: String,
    failsafe_cmdline: String,
    failsafe_entry: bool,
    menu_title: String,
    install_title: String,
    install_boot_id: u8,
    timeout_seconds: u32,
    theme: Option<String>,
    hypervisor: Option<String>,
    install_volume_id: String,
    live_volume_id: String,
    bootloader: &'static str,
}

#[derive(Serialize)]
struct PlannedVolume {
    name: String,
    realpath: String,
    /// None for the volume taking the remaining space.
    mbsize: Option<u64>,
}

#[derive(Serialize)]
struct Plan {
    boot: BootPlan,
    volume_manager: Option<&'static str>,
    /// blkid tag fstab entries refer to filesystems by.
    fstab_persistency: &'static str,
    filesystem: Option<String>,
    volumes: Vec<PlannedVolume>,
}

fn usage() -> &'static str {
    "Usage:\n  appliance-plan <descriptor.toml> <root_dir> [--json]"
}

fn main() -> Result<()> {
    logging::init(0);
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [descriptor, root_dir] => run(Path::new(descriptor), Path::new(root_dir), false),
        [descriptor, root_dir, json] if json == "--json" => {
            run(Path::new(descriptor), Path::new(root_dir), true)
        }
        _ => bail!(usage()),
    }
}

fn run(descriptor_path: &Path, root_dir: &Path, json: bool) -> Result<()> {
    let descriptor = Arc::new(
        ApplianceDescriptor::load(descriptor_path)
            .with_context(|| format!("loading descriptor '{}'", descriptor_path.display()))?,
    );

    let plan = Plan {
        boot: boot_plan(descriptor.clone(), root_dir),
        volume_manager: descriptor
            .build_type
            .volume_manager
            .map(|kind| kind.as_str()),
        fstab_persistency: descriptor.device_persistency().blkid_type(),
        filesystem: descriptor.filesystem().map(str::to_string),
        volumes: volume_plan(&descriptor, root_dir)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn boot_plan(descriptor: Arc<ApplianceDescriptor>, root_dir: &Path) -> BootPlan {
    let base = BootConfigBase::new("plan", descriptor, root_dir, CustomArgs::new());
    BootPlan {
        disk_boot_path: base.get_boot_path(BootTarget::Disk),
        iso_boot_path: base.get_boot_path(BootTarget::Iso),
        cmdline: base.get_boot_cmdline(),
        failsafe_cmdline: base.get_failsafe_boot_cmdline(),
        failsafe_entry: base.failsafe_boot_entry_requested(),
        menu_title: base.get_menu_entry_title(false),
        install_title: base.get_menu_entry_install_title(),
        install_boot_id: base.get_install_image_boot_id(),
        timeout_seconds: base.get_boot_timeout_seconds(),
        theme: base.get_boot_theme(),
        hypervisor: base.get_hypervisor_domain().map(str::to_string),
        install_volume_id: base.get_install_volume_id(),
        live_volume_id: base.get_live_volume_id(),
        bootloader: base.descriptor().bootloader().as_str(),
    }
}

fn volume_plan(descriptor: &ApplianceDescriptor, root_dir: &Path) -> Result<Vec<PlannedVolume>> {
    let volumes = descriptor.get_volumes().to_vec();
    if volumes.is_empty() {
        return Ok(Vec::new());
    }
    let filesystem = descriptor
        .filesystem()
        .context("descriptor has volumes but no build-type filesystem")?;

    let image_type = descriptor.build_type.image;
    let args = VolumeManagerArgs {
        image_type: Some(image_type),
        ..Default::default()
    };
    let base = VolumeManagerBase::new(
        "plan",
        Box::new(BlockDevice::new(PLAN_DEVICE, false)),
        root_dir,
        volumes,
        args,
    )
    .with_context(|| format!("planning volumes for '{}'", root_dir.display()))?;

    let canonical = base.get_canonical_volume_list();
    let mut planned = Vec::new();
    for volume in &canonical.volumes {
        let mbsize = base.get_volume_mbsize(volume, base.volumes(), filesystem, Some(image_type))?;
        planned.push(PlannedVolume {
            name: volume.name.clone(),
            realpath: volume.realpath.clone(),
            mbsize: Some(mbsize),
        });
    }
    if let Some(volume) = canonical.full_size_volume {
        planned.push(PlannedVolume {
            name: volume.name,
            realpath: volume.realpath,
            mbsize: None,
        });
    }
    Ok(planned)
}

fn print_plan(plan: &Plan) {
    let boot = &plan.boot;
    println!("Boot ({}):", boot.bootloader);
    println!("  disk boot path:    {}", boot.disk_boot_path);
    println!("  iso boot path:     {}", boot.iso_boot_path);
    println!("  cmdline:           {}", boot.cmdline);
    println!("  failsafe cmdline:  {}", boot.failsafe_cmdline);
    println!("  failsafe entry:    {}", boot.failsafe_entry);
    println!("  menu title:        {}", boot.menu_title);
    println!("  install title:     {}", boot.install_title);
    println!("  install boot id:   {}", boot.install_boot_id);
    println!("  timeout:           {}s", boot.timeout_seconds);
    if let Some(theme) = &boot.theme {
        println!("  theme:             {}", theme);
    }
    if let Some(hypervisor) = &boot.hypervisor {
        println!("  hypervisor:        {}", hypervisor);
    }
    println!("  install volume id: {}", boot.install_volume_id);
    println!("  live volume id:    {}", boot.live_volume_id);

    if plan.volumes.is_empty() {
        return;
    }
    println!(
        "Volumes ({}, {}):",
        plan.volume_manager.unwrap_or("no volume manager"),
        plan.filesystem.as_deref().unwrap_or("-")
    );
    println!("  fstab by {}", plan.fstab_persistency);
    for volume in &plan.volumes {
        match volume.mbsize {
            Some(mbsize) => println!("  {:<12} {:<24} {} MB", volume.name, volume.realpath, mbsize),
            None => println!("  {:<12} {:<24} remaining space", volume.name, volume.realpath),
        }
    }
}
