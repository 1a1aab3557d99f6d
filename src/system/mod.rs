//! Host-side helpers the boot and volume layers are written against.
//!
//! - [`path`] - directory creation, hierarchy sorting, recursive removal
//! - [`size`] - on-disk usage measurement and filesystem overhead
//! - [`disk_setup`] - boot partition policy
//! - [`mount`] - mount/umount of a device below a mountpoint
//! - [`sync`] - copying the root tree onto mounted volumes
//! - [`filesystem`] - filesystem creation on a device
//! - [`block_id`] - UUID/LABEL lookup
//! - [`identifier`] - MBR identifier for install and live media

pub mod block_id;
pub mod disk_setup;
pub mod filesystem;
pub mod identifier;
pub mod mount;
pub mod path;
pub mod size;
pub mod sync;
