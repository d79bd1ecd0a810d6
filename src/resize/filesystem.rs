//! Online filesystem growth after the partition has been extended.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::config::ToolsConfig;
use crate::core::errors::Result;
use crate::platform::process::CommandRunner;
use crate::resize::device::DeviceName;

/// Which grow tool a filesystem type needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowTool {
    /// Operates on the mount point.
    XfsGrowfs,
    /// Operates on the device; used for every non-xfs filesystem.
    Resize2fs,
}

impl GrowTool {
    #[must_use]
    pub fn for_fs_type(fs_type: &str) -> Self {
        if fs_type == "xfs" {
            Self::XfsGrowfs
        } else {
            Self::Resize2fs
        }
    }
}

pub struct FilesystemGrower {
    runner: Arc<dyn CommandRunner>,
    xfs_growfs: String,
    resize2fs: String,
}

impl FilesystemGrower {
    pub fn new(runner: Arc<dyn CommandRunner>, tools: &ToolsConfig) -> Self {
        Self {
            runner,
            xfs_growfs: tools.xfs_growfs.clone(),
            resize2fs: tools.resize2fs.clone(),
        }
    }

    /// The exact command line `grow` would run.
    #[must_use]
    pub fn command_for(
        &self,
        device: &DeviceName,
        mount_point: &Path,
        fs_type: &str,
    ) -> (String, Vec<String>) {
        match GrowTool::for_fs_type(fs_type) {
            GrowTool::XfsGrowfs => (
                self.xfs_growfs.clone(),
                vec!["-d".to_string(), mount_point.display().to_string()],
            ),
            GrowTool::Resize2fs => (self.resize2fs.clone(), vec![device.path().to_string()]),
        }
    }

    /// Grow the filesystem to fill its (already extended) partition.
    pub fn grow(&self, device: &DeviceName, mount_point: &Path, fs_type: &str) -> Result<GrowTool> {
        let tool = GrowTool::for_fs_type(fs_type);
        let (program, args) = self.command_for(device, mount_point, fs_type);
        self.runner.run_checked(&program, &args)?;
        eprintln!(
            "[VAG-FS] grew {fs_type} on {} ({program} {})",
            mount_point.display(),
            args.join(" ")
        );
        Ok(tool)
    }
}
