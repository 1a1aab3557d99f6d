//! Block device providers.
//!
//! A volume manager owns the provider of its backing device. Rust drops a
//! struct's own `Drop` before its fields, so volumes are always released
//! before the device that backs them. [`MappedDevice`] borrows its
//! provider, so a mapped device can never outlive it either.

/// Anything that exposes a block device node.
pub trait DeviceProvider {
    fn get_device(&self) -> String;

    fn is_loop(&self) -> bool;
}

/// A device node handed in by the caller, e.g. a partition of a loop
/// mapped disk image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    device: String,
    is_loop: bool,
}

impl BlockDevice {
    pub fn new(device: impl Into<String>, is_loop: bool) -> Self {
        Self {
            device: device.into(),
            is_loop,
        }
    }
}

impl DeviceProvider for BlockDevice {
    fn get_device(&self) -> String {
        self.device.clone()
    }

    fn is_loop(&self) -> bool {
        self.is_loop
    }
}

/// A device node whose lifetime is tied to the provider that created it.
pub struct MappedDevice<'a> {
    device: String,
    provider: &'a dyn DeviceProvider,
}

impl<'a> MappedDevice<'a> {
    pub fn new(device: impl Into<String>, provider: &'a dyn DeviceProvider) -> Self {
        Self {
            device: device.into(),
            provider,
        }
    }
}

impl DeviceProvider for MappedDevice<'_> {
    fn get_device(&self) -> String {
        self.device.clone()
    }

    fn is_loop(&self) -> bool {
        self.provider.is_loop()
    }
}

impl std::fmt::Debug for MappedDevice<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedDevice")
            .field("device", &self.device)
            .field("is_loop", &self.provider.is_loop())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_device_delegates_loop_state() {
        let disk = BlockDevice::new("/dev/loop0", true);
        let mapped = MappedDevice::new("/dev/mapper/loop0p2", &disk);
        assert_eq!(mapped.get_device(), "/dev/mapper/loop0p2");
        assert!(mapped.is_loop());
    }
}
