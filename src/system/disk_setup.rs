//! Boot partition policy.

use crate::descriptor::ApplianceDescriptor;
use crate::volume_manager::VolumeManagerKind;

/// Reports whether the disk layout has a dedicated boot partition.
pub trait DiskLayoutInspector {
    fn need_boot_partition(&self) -> bool;
}

/// Boot partition policy derived from the descriptor's build type.
#[derive(Debug, Clone, Copy)]
pub struct DiskSetup<'a> {
    descriptor: &'a ApplianceDescriptor,
}

impl<'a> DiskSetup<'a> {
    pub fn new(descriptor: &'a ApplianceDescriptor) -> Self {
        Self { descriptor }
    }
}

impl DiskLayoutInspector for DiskSetup<'_> {
    /// An explicit `bootpartition` setting wins. Otherwise raid, LVM and
    /// overlay roots all need the kernel outside of the root filesystem.
    fn need_boot_partition(&self) -> bool {
        let build_type = &self.descriptor.build_type;
        if let Some(requested) = build_type.bootpartition {
            return requested;
        }
        build_type.mdraid.is_some()
            || build_type.volume_manager == Some(VolumeManagerKind::Lvm)
            || build_type.overlayroot
    }
}
