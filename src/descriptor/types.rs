use crate::error::Error;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Where the boot files end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootTarget {
    Disk,
    Iso,
}

impl FromStr for BootTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disk" => Ok(Self::Disk),
            "iso" => Ok(Self::Iso),
            other => Err(Error::Configuration(format!(
                "Invalid boot loader target {}",
                other
            ))),
        }
    }
}

/// Firmware the appliance is built for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareType {
    #[default]
    #[serde(alias = "default")]
    Bios,
    Efi,
    Uefi,
    Ec2,
    Ec2Hvm,
    Ofw,
    Opal,
}

impl FirmwareType {
    pub fn efi_mode(&self) -> bool {
        matches!(self, Self::Efi | Self::Uefi)
    }

    pub fn ec2_mode(&self) -> bool {
        matches!(self, Self::Ec2 | Self::Ec2Hvm)
    }

    pub fn bios_mode(&self) -> bool {
        matches!(self, Self::Bios)
    }
}

/// Build type of the image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    /// Self-expanding disk, resized on first boot.
    Oem,
    #[default]
    Vmx,
    Iso,
    Pxe,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oem => "oem",
            Self::Vmx => "vmx",
            Self::Iso => "iso",
            Self::Pxe => "pxe",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
