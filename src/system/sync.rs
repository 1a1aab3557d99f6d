//! Copying a directory tree onto mounted volumes.

use crate::error::Result;
use crate::process::Cmd;
use std::path::Path;
use tracing::info;

/// rsync flags used when syncing the root tree onto volumes: archive,
/// hardlinks, xattrs, ACLs, and no crossing of filesystem boundaries.
pub const SYNC_OPTIONS: &[&str] = &["-a", "-H", "-X", "-A", "--one-file-system"];

/// Copies the contents of one directory into another.
pub trait DataCopier {
    fn sync(&self, source: &Path, target: &Path, options: &[&str], exclude: &[String])
        -> Result<()>;
}

/// `rsync` based copier.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataSync;

impl DataSync {
    fn exclude_args(exclude: &[String]) -> Vec<String> {
        exclude
            .iter()
            .flat_map(|pattern| {
                [
                    "--exclude".to_string(),
                    format!("/{}", pattern.trim_start_matches('/')),
                ]
            })
            .collect()
    }
}

impl DataCopier for DataSync {
    fn sync(
        &self,
        source: &Path,
        target: &Path,
        options: &[&str],
        exclude: &[String],
    ) -> Result<()> {
        info!("Syncing {} to {}", source.display(), target.display());
        // trailing slash: copy the contents, not the directory itself
        let source = format!("{}/", source.display());
        Cmd::new("rsync")
            .args(options.iter().copied())
            .args(Self::exclude_args(exclude))
            .arg(source)
            .arg_path(target)
            .error_msg("rsync failed")
            .run()?;
        Ok(())
    }
}
