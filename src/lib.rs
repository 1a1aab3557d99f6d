//! Boot and volume layout configuration for bootable OS appliance images.
//!
//! An appliance is described by an [`ApplianceDescriptor`]. From it this
//! crate derives:
//!
//! - **Boot policy** - kernel command lines, menu titles, timeouts and
//!   volume IDs shared by all bootloaders ([`bootloader::BootConfigBase`])
//! - **Bootloader files** - grub2 and isolinux configuration
//!   ([`bootloader::BootLoader`])
//! - **Volume layout** - ordering, sizing and realization of LVM logical
//!   volumes or btrfs subvolumes ([`volume_manager::VolumeManagerBackend`])
//! - **Preflight checks** - host tool validation before touching devices
//!
//! # Architecture
//!
//! ```text
//! descriptor ──┬── bootloader::BootConfigBase ── Grub2Config / IsolinuxConfig
//!              │
//!              └── volume_manager::VolumeManagerBase ── Lvm / Btrfs
//!                        │
//!                        └── system (mount, size, sync, filesystem)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use appliance_builder::volume_manager::{Persistency, VolumeManager, VolumeManagerBackend};
//!
//! let mut volumes = VolumeManagerBackend::new(kind, device, &root_dir, descriptor.get_volumes(), args)?;
//! volumes.setup(None)?;
//! volumes.create_volumes("ext4")?;
//! volumes.sync_data(&[])?;
//! let fstab = volumes.get_fstab(Persistency::ByUuid, "ext4")?;
//! volumes.cleanup()?;
//! ```

pub mod bootloader;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod preflight;
pub mod process;
pub mod storage;
pub mod system;
pub mod volume_manager;

pub use bootloader::{BootConfigBase, BootLoader, BootLoaderConfig, BootLoaderKind};
pub use descriptor::ApplianceDescriptor;
pub use error::{Error, Result};
pub use volume_manager::{
    Persistency, VolumeManager, VolumeManagerBackend, VolumeManagerBase, VolumeManagerKind,
};
