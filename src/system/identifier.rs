//! MBR identifier written to install and live media.
//!
//! Bootloaders on ISO media locate their own boot device by searching for
//! a file that holds this identifier.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemIdentifier {
    id: String,
}

impl SystemIdentifier {
    /// Compute a random `0x%08x` identifier.
    pub fn calculate() -> Self {
        Self::from_value(rand::random())
    }

    pub fn from_value(value: u32) -> Self {
        Self {
            id: format!("0x{:08x}", value),
        }
    }

    pub fn get_id(&self) -> &str {
        &self.id
    }

    /// Write the identifier to `path`, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            crate::system::path::create(parent)?;
        }
        fs::write(path, format!("{}\n", self.id)).map_err(|e| Error::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identifier_format() {
        let id = SystemIdentifier::calculate();
        assert_eq!(id.get_id().len(), 10);
        assert!(id.get_id().starts_with("0x"));
        assert_eq!(SystemIdentifier::from_value(0xbeef).get_id(), "0x0000beef");
    }

    #[test]
    fn test_identifiers_differ_between_calls() {
        let ids: std::collections::HashSet<String> = (0..8)
            .map(|_| SystemIdentifier::calculate().get_id().to_string())
            .collect();
        assert!(ids.len() > 1);
    }

    #[test]
    fn test_write_identifier() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("boot/mbrid");
        SystemIdentifier::from_value(1).write(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0x00000001\n");
    }
}
