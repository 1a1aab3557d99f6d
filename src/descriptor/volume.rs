use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Attribute that disables copy-on-write on the realized volume path.
pub const NO_COPY_ON_WRITE: &str = "no-copy-on-write";

/// A filesystem volume as configured in the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Volume {
    pub name: String,
    /// Mount path relative to the appliance root, `/` for the root volume.
    pub realpath: String,
    /// Size spec `<type>:<value>`; absent means `freespace:0`.
    pub size: Option<String>,
    #[serde(default)]
    pub fullsize: bool,
    pub label: Option<String>,
    #[serde(default)]
    pub attributes: Vec<String>,
}

impl Volume {
    pub fn is_root(&self) -> bool {
        self.realpath == "/"
    }

    /// Whether `other` lies strictly below this volume's path.
    pub fn is_ancestor_of(&self, other: &Volume) -> bool {
        self.realpath != other.realpath
            && Path::new(&other.realpath).starts_with(Path::new(&self.realpath))
    }

    pub fn parsed_size(&self) -> Result<VolumeSize> {
        match &self.size {
            Some(spec) => spec.parse(),
            None => Ok(VolumeSize {
                kind: SizeKind::Freespace,
                mbsize: 0,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeKind {
    /// Size computed from the measured content plus the given extra space.
    Freespace,
    /// The value is the volume size in MB.
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeSize {
    pub kind: SizeKind,
    pub mbsize: u64,
}

impl std::str::FromStr for VolumeSize {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self> {
        let (kind, value) = spec.split_once(':').ok_or_else(|| {
            Error::Configuration(format!("Invalid volume size spec {}", spec))
        })?;
        let mbsize = value.trim().parse::<u64>().map_err(|_| {
            Error::Configuration(format!("Invalid volume size value in {}", spec))
        })?;
        let kind = match kind.trim() {
            "freespace" => SizeKind::Freespace,
            _ => SizeKind::Fixed,
        };
        Ok(Self { kind, mbsize })
    }
}
