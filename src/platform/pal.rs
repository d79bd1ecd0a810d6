//! PAL trait and the Linux implementation: mount enumeration and usage stats.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::sys::statvfs::statvfs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VagError};

const PROC_MOUNTS: &str = "/proc/self/mounts";
const PROC_MOUNTINFO: &str = "/proc/self/mountinfo";
const SYS_DEV_BLOCK: &str = "/sys/dev/block";
/// Placeholder device some initramfs setups mount the root filesystem from.
const ROOT_ALIAS: &str = "/dev/root";

/// Filesystem statistics for a mount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub fs_type: String,
    pub mount_point: PathBuf,
}

impl FsStats {
    /// Utilization as seen by unprivileged users: `used / (used + available)`.
    #[must_use]
    pub fn used_pct(&self) -> f64 {
        let used = self.total_bytes.saturating_sub(self.free_bytes);
        let denom = used.saturating_add(self.available_bytes);
        if denom == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            (used as f64 * 100.0) / denom as f64
        }
    }
}

/// Mount-point metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountPoint {
    pub path: PathBuf,
    pub device: String,
    pub fs_type: String,
    pub is_ram_backed: bool,
}

impl MountPoint {
    /// Backed by a block device rather than a pseudo or RAM filesystem.
    #[must_use]
    pub fn is_block_backed(&self) -> bool {
        self.device.starts_with("/dev/") && !self.is_ram_backed
    }
}

/// OS abstraction used by the usage evaluator.
pub trait Platform: Send + Sync {
    fn fs_stats(&self, path: &Path) -> Result<FsStats>;
    fn mount_points(&self) -> Result<Vec<MountPoint>>;
}

/// Linux implementation backed by a mount table and `statvfs(2)`.
///
/// The mount table is read once per instance, so every disk of one scan sees
/// the same snapshot. A root filesystem listed as `/dev/root` is resolved to
/// its real block device through mountinfo and sysfs.
#[derive(Debug)]
pub struct LinuxPlatform {
    mount_table: PathBuf,
    mount_info: PathBuf,
    sys_dev_block: PathBuf,
    snapshot: RwLock<Option<Vec<MountPoint>>>,
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::with_sources(PROC_MOUNTS, PROC_MOUNTINFO, SYS_DEV_BLOCK)
    }

    /// Read mounts, mountinfo and the `major:minor` device links from
    /// alternate locations.
    #[must_use]
    pub fn with_sources(
        mount_table: impl Into<PathBuf>,
        mount_info: impl Into<PathBuf>,
        sys_dev_block: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mount_table: mount_table.into(),
            mount_info: mount_info.into(),
            sys_dev_block: sys_dev_block.into(),
            snapshot: RwLock::new(None),
        }
    }

    fn snapshot(&self) -> Result<Vec<MountPoint>> {
        if let Some(mounts) = self.snapshot.read().as_ref() {
            return Ok(mounts.clone());
        }

        let raw = fs::read_to_string(&self.mount_table)
            .map_err(|source| VagError::io(&self.mount_table, source))?;
        let mut mounts = parse_mount_table(&raw);
        if mounts.is_empty() {
            return Err(VagError::MountParse {
                details: format!("{} contained no usable entries", self.mount_table.display()),
            });
        }
        for mount in mounts.iter_mut().filter(|m| m.device == ROOT_ALIAS) {
            match self.resolve_root_alias(&mount.path) {
                Ok(device) => {
                    eprintln!(
                        "[VAG-MOUNT] {ROOT_ALIAS} on {} is {device}",
                        mount.path.display()
                    );
                    mount.device = device;
                }
                Err(err) => eprintln!(
                    "[VAG-MOUNT] warning: cannot resolve {ROOT_ALIAS} on {}: {err}",
                    mount.path.display()
                ),
            }
        }
        *self.snapshot.write() = Some(mounts.clone());
        Ok(mounts)
    }

    /// Map the mount's `major:minor` to a `/dev` node via `/sys/dev/block`.
    fn resolve_root_alias(&self, mount_point: &Path) -> Result<String> {
        let raw = fs::read_to_string(&self.mount_info)
            .map_err(|source| VagError::io(&self.mount_info, source))?;
        let dev_id = mountinfo_device_id(&raw, mount_point).ok_or_else(|| VagError::MountParse {
            details: format!(
                "{} has no entry for {}",
                self.mount_info.display(),
                mount_point.display()
            ),
        })?;
        let link = self.sys_dev_block.join(&dev_id);
        let target = fs::read_link(&link).map_err(|source| VagError::io(&link, source))?;
        let name = target
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| VagError::MountParse {
                details: format!("{} points at {}", link.display(), target.display()),
            })?;
        Ok(format!("/dev/{name}"))
    }
}

impl Platform for LinuxPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        let mounts = self.snapshot()?;
        let mount = find_mount(path, &mounts).ok_or_else(|| VagError::Probe {
            path: path.to_path_buf(),
            details: "path is not below any mount".to_string(),
        })?;
        let stat = statvfs(path).map_err(|errno| VagError::Probe {
            path: path.to_path_buf(),
            details: format!("statvfs failed: {errno}"),
        })?;
        let block = stat.fragment_size();
        let bytes = |blocks| block.saturating_mul(blocks);
        Ok(FsStats {
            total_bytes: bytes(stat.blocks()),
            free_bytes: bytes(stat.blocks_free()),
            available_bytes: bytes(stat.blocks_available()),
            fs_type: mount.fs_type.clone(),
            mount_point: mount.path.clone(),
        })
    }

    fn mount_points(&self) -> Result<Vec<MountPoint>> {
        self.snapshot()
    }
}

/// In-memory mock implementation for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    mounts: Vec<MountPoint>,
    stats_by_mount: HashMap<PathBuf, FsStats>,
}

impl MockPlatform {
    #[must_use]
    pub fn new(mounts: Vec<MountPoint>, stats_by_mount: HashMap<PathBuf, FsStats>) -> Self {
        Self {
            mounts,
            stats_by_mount,
        }
    }

    /// Register a block-backed mount with the given size and utilization.
    #[must_use]
    pub fn with_disk(
        mut self,
        device: &str,
        mount_point: &str,
        fs_type: &str,
        total_bytes: u64,
        used_pct: f64,
    ) -> Self {
        let path = PathBuf::from(mount_point);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let used = ((total_bytes as f64) * used_pct / 100.0) as u64;
        let free = total_bytes.saturating_sub(used);
        self.mounts.push(MountPoint {
            path: path.clone(),
            device: device.to_string(),
            fs_type: fs_type.to_string(),
            is_ram_backed: is_ram_fs(fs_type),
        });
        self.stats_by_mount.insert(
            path.clone(),
            FsStats {
                total_bytes,
                free_bytes: free,
                available_bytes: free,
                fs_type: fs_type.to_string(),
                mount_point: path,
            },
        );
        self
    }
}

impl Platform for MockPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        let mount = find_mount(path, &self.mounts).ok_or_else(|| VagError::Probe {
            path: path.to_path_buf(),
            details: "mock mount not found".to_string(),
        })?;
        self.stats_by_mount
            .get(&mount.path)
            .cloned()
            .ok_or_else(|| VagError::Probe {
                path: mount.path.clone(),
                details: "mock stats not found".to_string(),
            })
    }

    fn mount_points(&self) -> Result<Vec<MountPoint>> {
        Ok(self.mounts.clone())
    }
}

/// Detect active platform implementation.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxPlatform::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(VagError::UnsupportedPlatform {
            details: "only Linux is currently implemented".to_string(),
        })
    }
}

/// Parse `/proc/self/mounts` lines: `device mount_point fs_type options ...`.
fn parse_mount_table(raw: &str) -> Vec<MountPoint> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let (Some(device), Some(path), Some(fs_type)) =
                (fields.next(), fields.next(), fields.next())
            else {
                eprintln!("[VAG-MOUNT] warning: skipping malformed mount entry: {line}");
                return None;
            };
            Some(MountPoint {
                path: unescape_mount_field(path),
                device: device.to_string(),
                fs_type: fs_type.to_string(),
                is_ram_backed: is_ram_fs(fs_type),
            })
        })
        .collect()
}

/// Deepest mount containing `path`.
fn find_mount<'a>(path: &Path, mounts: &'a [MountPoint]) -> Option<&'a MountPoint> {
    mounts
        .iter()
        .filter(|mount| path.starts_with(&mount.path))
        .max_by_key(|mount| mount.path.components().count())
}

/// `major:minor` of the last mountinfo entry mounted at `mount_point`.
///
/// Fields: `id parent major:minor root mount_point options ...`.
fn mountinfo_device_id(raw: &str, mount_point: &Path) -> Option<String> {
    raw.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let dev_id = fields.nth(2)?;
            let path = fields.nth(1)?;
            (unescape_mount_field(path) == mount_point).then(|| dev_id.to_string())
        })
        .last()
}

fn is_ram_fs(fs_type: &str) -> bool {
    ["tmpfs", "ramfs", "devtmpfs"]
        .iter()
        .any(|ram| fs_type.eq_ignore_ascii_case(ram))
}

/// The kernel writes space, tab, newline and backslash in mount paths as `\NNN` octal.
fn unescape_mount_field(raw: &str) -> PathBuf {
    let mut out = Vec::with_capacity(raw.len());
    let mut rest = raw.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'\\'
            && let Some(decoded) = tail.get(..3).and_then(octal_byte)
        {
            out.push(decoded);
            rest = &tail[3..];
        } else {
            out.push(byte);
            rest = tail;
        }
    }
    PathBuf::from(OsString::from_vec(out))
}

fn octal_byte(digits: &[u8]) -> Option<u8> {
    if !digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
        return None;
    }
    u8::from_str_radix(std::str::from_utf8(digits).ok()?, 8).ok()
}
