//! On-disk size accounting for volume sizing.

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Minimum extra space every freespace-sized volume receives, in MB.
pub const MIN_VOLUME_MBYTES: u64 = 30;

/// Inode size assumed for ext filesystems, in bytes.
pub const DEFAULT_INODE_SIZE: u64 = 256;

const MBYTE: u64 = 1024 * 1024;

/// Measures the data below a directory.
#[derive(Debug, Clone)]
pub struct SystemSize {
    source_dir: PathBuf,
}

impl SystemSize {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Apparent size in bytes of everything below the source directory,
    /// skipping the given subtrees. Hardlinked files count once.
    pub fn accumulate_bytes(&self, exclude: &[PathBuf]) -> Result<u64> {
        if !self.source_dir.exists() {
            return Ok(0);
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        let walker = WalkDir::new(&self.source_dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !exclude.iter().any(|ex| entry.path() == ex));

        for entry in walker {
            let entry = entry.map_err(|e| self.walk_error(e))?;
            if entry.file_type().is_dir() {
                continue;
            }
            let metadata = entry.metadata().map_err(|e| self.walk_error(e))?;
            if metadata.nlink() > 1 && !seen.insert((metadata.dev(), metadata.ino())) {
                continue;
            }
            total += metadata.len();
        }

        Ok(total)
    }

    /// Like [`accumulate_bytes`](Self::accumulate_bytes), rounded up to MB.
    pub fn accumulate_mbyte_file_sizes(&self, exclude: &[PathBuf]) -> Result<u64> {
        let bytes = self.accumulate_bytes(exclude)?;
        Ok(bytes.div_ceil(MBYTE))
    }

    /// Number of entries below the source directory.
    pub fn accumulate_files(&self) -> Result<u64> {
        if !self.source_dir.exists() {
            return Ok(0);
        }
        let mut count = 0;
        for entry in WalkDir::new(&self.source_dir).min_depth(1) {
            entry.map_err(|e| self.walk_error(e))?;
            count += 1;
        }
        Ok(count)
    }

    /// Size in MB a filesystem needs to hold `mbytes` of data.
    ///
    /// ext filesystems get 50% on top plus room for two inodes per file,
    /// btrfs and xfs get 50% on top. Other filesystems are taken as is.
    pub fn customize(&self, mbytes: u64, filesystem: &str) -> Result<u64> {
        let size = mbytes as f64;
        let customized = if filesystem.starts_with("ext") {
            let files = self.accumulate_files()?;
            let inode_mbytes = (files * DEFAULT_INODE_SIZE) as f64 / MBYTE as f64;
            size * 1.5 + 2.0 * inode_mbytes
        } else if filesystem == "btrfs" || filesystem == "xfs" {
            size * 1.5
        } else {
            size
        };
        Ok(customized as u64)
    }

    /// Extra MB on top of `mbytes` the filesystem needs for metadata.
    pub fn overhead_for(&self, mbytes: u64, filesystem: &str) -> Result<u64> {
        Ok(self.customize(mbytes, filesystem)?.saturating_sub(mbytes))
    }

    fn walk_error(&self, err: walkdir::Error) -> Error {
        let path = err
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.source_dir.clone());
        Error::io(path, err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("var/log")).unwrap();
        fs::create_dir_all(temp.path().join("etc")).unwrap();
        fs::write(temp.path().join("etc/hostname"), vec![b'a'; 100]).unwrap();
        fs::write(temp.path().join("var/data"), vec![b'b'; 1000]).unwrap();
        fs::write(temp.path().join("var/log/messages"), vec![b'c'; 10_000]).unwrap();
        temp
    }

    #[test]
    fn test_accumulate_bytes() {
        let temp = tree();
        let size = SystemSize::new(temp.path());
        assert_eq!(size.accumulate_bytes(&[]).unwrap(), 11_100);
    }

    #[test]
    fn test_accumulate_bytes_with_exclude() {
        let temp = tree();
        let size = SystemSize::new(temp.path());
        let exclude = vec![temp.path().join("var/log")];
        assert_eq!(size.accumulate_bytes(&exclude).unwrap(), 1_100);
    }

    #[test]
    fn test_hardlinks_count_once() {
        let temp = tree();
        fs::hard_link(
            temp.path().join("var/data"),
            temp.path().join("etc/data-link"),
        )
        .unwrap();
        let size = SystemSize::new(temp.path());
        assert_eq!(size.accumulate_bytes(&[]).unwrap(), 11_100);
    }

    #[test]
    fn test_mbyte_rounding() {
        let temp = tree();
        let size = SystemSize::new(temp.path());
        assert_eq!(size.accumulate_mbyte_file_sizes(&[]).unwrap(), 1);

        let empty = TempDir::new().unwrap();
        let size = SystemSize::new(empty.path());
        assert_eq!(size.accumulate_mbyte_file_sizes(&[]).unwrap(), 0);
    }

    #[test]
    fn test_missing_source_measures_zero() {
        let size = SystemSize::new("/nonexistent/source/tree");
        assert_eq!(size.accumulate_bytes(&[]).unwrap(), 0);
        assert_eq!(size.accumulate_files().unwrap(), 0);
    }

    #[test]
    fn test_customize_per_filesystem() {
        let temp = tree();
        let size = SystemSize::new(temp.path());
        assert_eq!(size.customize(100, "btrfs").unwrap(), 150);
        assert_eq!(size.customize(100, "xfs").unwrap(), 150);
        assert_eq!(size.customize(100, "vfat").unwrap(), 100);
        // 6 entries * 256 bytes of inodes is far below 1 MB
        assert_eq!(size.customize(100, "ext4").unwrap(), 150);
        assert_eq!(size.overhead_for(100, "ext3").unwrap(), 50);
    }
}
