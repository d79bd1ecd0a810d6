//! Candidate enumeration: every block-backed mount joined with its usage and
//! backing volume.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VagError};
use crate::platform::pal::Platform;
use crate::resize::device::DeviceName;
use crate::resize::mapper::DeviceMapper;

/// One mounted filesystem and the volume behind it, rebuilt every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskRecord {
    pub volume_id: String,
    pub device: DeviceName,
    pub mount_point: PathBuf,
    pub used_pct: f64,
    pub total_space_bytes: u64,
    pub fs_type: String,
    pub volume_size_gib: u64,
}

/// Result of evaluating one mount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScanEntry {
    Disk(DiskRecord),
    /// Not a cloud volume: unknown device naming, or an NVMe controller
    /// that is not block storage (instance store, local SSD).
    Unsupported { device: String, mount_point: PathBuf },
}

pub struct UsageEvaluator {
    platform: Arc<dyn Platform>,
    mapper: DeviceMapper,
}

impl UsageEvaluator {
    pub fn new(platform: Arc<dyn Platform>, mapper: DeviceMapper) -> Self {
        Self { platform, mapper }
    }

    /// Evaluate every block-backed mount, once per device and mount point.
    ///
    /// Any probe or mapping failure aborts the whole scan. NVMe devices whose
    /// controller is not block storage are reported and skipped.
    pub fn scan(&self) -> Result<Vec<ScanEntry>> {
        let mounts = self.platform.mount_points()?;
        let mut seen_devices = HashSet::new();
        let mut seen_mounts = HashSet::new();
        let mut entries = Vec::new();

        for mount in mounts.into_iter().filter(|m| m.is_block_backed()) {
            if !seen_devices.insert(mount.device.clone())
                || !seen_mounts.insert(mount.path.clone())
            {
                continue;
            }

            let device = DeviceName::parse(&mount.device);
            if !device.is_supported() {
                eprintln!(
                    "[VAG-SCAN] {} on {}: not a cloud volume, ignoring",
                    mount.device,
                    mount.path.display()
                );
                entries.push(ScanEntry::Unsupported {
                    device: mount.device,
                    mount_point: mount.path,
                });
                continue;
            }

            let mapping = match self.mapper.resolve(&device) {
                Ok(mapping) => mapping,
                Err(VagError::NotBlockStorage { model, .. }) => {
                    eprintln!(
                        "[VAG-SCAN] {} on {}: controller model {model:?} is not block storage, ignoring",
                        mount.device,
                        mount.path.display()
                    );
                    entries.push(ScanEntry::Unsupported {
                        device: mount.device,
                        mount_point: mount.path,
                    });
                    continue;
                }
                Err(err) => return Err(err),
            };
            let stats = self.platform.fs_stats(&mount.path)?;
            if stats.total_bytes == 0 {
                return Err(VagError::Probe {
                    path: mount.path,
                    details: "filesystem reports zero capacity".to_string(),
                });
            }

            entries.push(ScanEntry::Disk(DiskRecord {
                volume_id: mapping.volume.volume_id,
                device,
                mount_point: mount.path,
                used_pct: stats.used_pct(),
                total_space_bytes: stats.total_bytes,
                fs_type: mount.fs_type,
                volume_size_gib: mapping.volume.size_gib,
            }));
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ec2::{ModificationState, Volume, VolumeService};
    use crate::platform::nvme::{
        DeviceDescriptorProbe, INSTANCE_STORE_MODEL, NvmeDescriptor, identify_page,
        parse_identify_controller,
    };
    use crate::platform::pal::{FsStats, LinuxPlatform, MockPlatform, MountPoint};
    use std::collections::HashMap;

    struct OneVolumePerSlot;

    impl VolumeService for OneVolumePerSlot {
        fn describe_volumes(&self, slot: &str, _instance_id: &str) -> Result<Vec<Volume>> {
            Ok(vec![Volume {
                volume_id: format!("vol{}", slot.replace('/', "-")),
                size_gib: 100,
            }])
        }

        fn modify_volume(&self, _volume_id: &str, _target_size_gib: u64) -> Result<()> {
            unreachable!()
        }

        fn describe_volume_modifications(
            &self,
            _volume_id: &str,
        ) -> Result<Vec<ModificationState>> {
            unreachable!()
        }
    }

    struct NoController;

    impl DeviceDescriptorProbe for NoController {
        fn describe(&self, device: &str) -> Result<NvmeDescriptor> {
            Err(VagError::DeviceDescriptor {
                device: device.to_string(),
                details: "no controller in tests".to_string(),
            })
        }
    }

    /// Every controller answers with an instance-store identify page.
    struct InstanceStoreOnly;

    impl DeviceDescriptorProbe for InstanceStoreOnly {
        fn describe(&self, device: &str) -> Result<NvmeDescriptor> {
            let page = identify_page("AWS1A2B3C4D5E6F", INSTANCE_STORE_MODEL, "");
            parse_identify_controller(device, &page)
        }
    }

    fn evaluator(platform: MockPlatform) -> UsageEvaluator {
        evaluator_with(Arc::new(platform), Arc::new(NoController))
    }

    fn evaluator_with(
        platform: Arc<dyn Platform>,
        nvme: Arc<dyn DeviceDescriptorProbe>,
    ) -> UsageEvaluator {
        let mapper = DeviceMapper::new(Arc::new(OneVolumePerSlot), nvme, "i-1");
        UsageEvaluator::new(platform, mapper)
    }

    #[test]
    fn builds_records_for_block_mounts_only() {
        let platform = MockPlatform::default()
            .with_disk("/dev/xvda1", "/", "xfs", 8_u64 << 30, 40.0)
            .with_disk("/dev/xvdf", "/data", "ext4", 100_u64 << 30, 92.0)
            .with_disk("tmpfs", "/run", "tmpfs", 1_u64 << 30, 1.0);
        let entries = evaluator(platform).scan().expect("scan");
        assert_eq!(entries.len(), 2);

        let ScanEntry::Disk(data) = &entries[1] else {
            panic!("expected disk record, got {:?}", entries[1]);
        };
        assert_eq!(data.volume_id, "vol-dev-sdf");
        assert_eq!(data.mount_point, PathBuf::from("/data"));
        assert_eq!(data.fs_type, "ext4");
        assert_eq!(data.total_space_bytes, 100_u64 << 30);
        assert_eq!(data.volume_size_gib, 100);
        assert!((data.used_pct - 92.0).abs() < 0.01);
    }

    #[test]
    fn unsupported_devices_are_reported_not_mapped() {
        let platform = MockPlatform::default().with_disk(
            "/dev/loop0",
            "/snap/core",
            "squashfs",
            1_u64 << 20,
            100.0,
        );
        let entries = evaluator(platform).scan().expect("scan");
        assert!(matches!(entries[0], ScanEntry::Unsupported { .. }));
    }

    #[test]
    fn bind_mounts_of_same_device_are_evaluated_once() {
        let platform = MockPlatform::default()
            .with_disk("/dev/xvdf", "/data", "ext4", 10_u64 << 30, 50.0)
            .with_disk("/dev/xvdf", "/srv/data", "ext4", 10_u64 << 30, 50.0);
        let entries = evaluator(platform).scan().expect("scan");
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn ioctl_failure_aborts_scan() {
        let platform = MockPlatform::default()
            .with_disk("/dev/xvdf", "/data", "ext4", 10_u64 << 30, 50.0)
            .with_disk("/dev/nvme1n1", "/logs", "xfs", 10_u64 << 30, 50.0);
        let err = evaluator(platform).scan().unwrap_err();
        assert_eq!(err.code(), "VAG-2003");
    }

    #[test]
    fn instance_store_disk_is_skipped() {
        let platform = MockPlatform::default()
            .with_disk("/dev/xvdf", "/data", "ext4", 10_u64 << 30, 95.0)
            .with_disk("/dev/nvme1n1", "/scratch", "xfs", 10_u64 << 30, 50.0);
        let entries = evaluator_with(Arc::new(platform), Arc::new(InstanceStoreOnly))
            .scan()
            .expect("scan");
        assert_eq!(entries.len(), 2);
        assert!(matches!(&entries[0], ScanEntry::Disk(d) if d.volume_id == "vol-dev-sdf"));
        assert_eq!(
            entries[1],
            ScanEntry::Unsupported {
                device: "/dev/nvme1n1".to_string(),
                mount_point: PathBuf::from("/scratch"),
            }
        );
    }

    #[test]
    fn root_alias_mount_becomes_disk_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        std::fs::write(root.join("mounts"), "/dev/root / ext4 rw,relatime 0 0\n")
            .expect("write mounts");
        std::fs::write(
            root.join("mountinfo"),
            "22 1 202:1 / / rw,relatime shared:1 - ext4 /dev/root rw\n",
        )
        .expect("write mountinfo");
        std::fs::create_dir(root.join("block")).expect("mkdir block");
        std::os::unix::fs::symlink(
            "../../devices/vbd-51713/block/xvda/xvda1",
            root.join("block").join("202:1"),
        )
        .expect("symlink");

        let platform = LinuxPlatform::with_sources(
            root.join("mounts"),
            root.join("mountinfo"),
            root.join("block"),
        );
        let entries = evaluator_with(Arc::new(platform), Arc::new(NoController))
            .scan()
            .expect("scan");
        let [ScanEntry::Disk(disk)] = entries.as_slice() else {
            panic!("expected one disk record, got {entries:?}");
        };
        assert_eq!(disk.device, DeviceName::parse("/dev/xvda1"));
        assert_eq!(disk.volume_id, "vol-dev-sda1");
        assert_eq!(disk.mount_point, PathBuf::from("/"));
        assert!(disk.total_space_bytes > 0);
    }

    #[test]
    fn missing_usage_stats_abort_scan() {
        let mounts = vec![MountPoint {
            path: PathBuf::from("/data"),
            device: "/dev/xvdf".to_string(),
            fs_type: "ext4".to_string(),
            is_ram_backed: false,
        }];
        let platform = MockPlatform::new(mounts, HashMap::new());
        let err = evaluator(platform).scan().unwrap_err();
        assert!(matches!(err, VagError::Probe { .. }));
    }

    #[test]
    fn zero_capacity_is_probe_error() {
        let path = PathBuf::from("/data");
        let mounts = vec![MountPoint {
            path: path.clone(),
            device: "/dev/xvdf".to_string(),
            fs_type: "ext4".to_string(),
            is_ram_backed: false,
        }];
        let stats = HashMap::from([(
            path.clone(),
            FsStats {
                total_bytes: 0,
                free_bytes: 0,
                available_bytes: 0,
                fs_type: "ext4".to_string(),
                mount_point: path,
            },
        )]);
        let err = evaluator(MockPlatform::new(mounts, stats)).scan().unwrap_err();
        assert!(err.to_string().contains("zero capacity"), "{err}");
    }
}
