//! Error types for boot and volume configuration.
//!
//! Every error raised here is fatal for the current build. Nothing in this
//! crate retries or silently skips a failed step.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for appliance configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid caller input, e.g. an unknown boot target or size spec.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A prerequisite is missing or a capability is not supported.
    #[error("Setup error: {0}")]
    Setup(String),

    /// A backend does not provide the requested operation.
    #[error("{operation} is not implemented by the {backend} backend")]
    Unimplemented {
        backend: &'static str,
        operation: &'static str,
    },

    /// The requested LVM volume group is already in use on the build host.
    #[error("Requested volume group {0} is in use on this host")]
    VolumeGroupConflict(String),

    #[error("Command `{command}` failed with {status}: {stderr}")]
    ToolFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to execute `{command}`: {source}")]
    ToolMissing {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid appliance descriptor {}: {source}", path.display())]
    Descriptor {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
