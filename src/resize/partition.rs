//! Partition-table growth via `growpart`.

#![allow(missing_docs)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VagError};
use crate::platform::process::CommandRunner;
use crate::resize::device::DeviceName;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PartitionOutcome {
    /// Filesystem sits directly on the disk; nothing to extend.
    NotRequired,
    Grown { disk: String, partition: u32 },
}

pub struct PartitionGrower {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl PartitionGrower {
    pub fn new(runner: Arc<dyn CommandRunner>, program: &str) -> Self {
        Self {
            runner,
            program: program.to_string(),
        }
    }

    /// Extend the partition holding `device` to the end of its disk.
    ///
    /// Any non-zero exit is an error, including growpart's "no change" exit.
    pub fn grow(&self, device: &DeviceName) -> Result<PartitionOutcome> {
        let (Some(disk), partition) = (device.parent(), device.partition()) else {
            return Err(VagError::Mapping {
                device: device.path().to_string(),
                slot: "<unrecognized device name>".to_string(),
            });
        };
        let Some(partition) = partition else {
            eprintln!("[VAG-PART] {device}: whole-disk filesystem, no partition to grow");
            return Ok(PartitionOutcome::NotRequired);
        };

        let args = vec![disk.to_string(), partition.to_string()];
        let output = self.runner.run_checked(&self.program, &args)?;
        eprintln!(
            "[VAG-PART] {} {disk} {partition}: {}",
            self.program,
            output.stdout.trim()
        );
        Ok(PartitionOutcome::Grown {
            disk: disk.to_string(),
            partition,
        })
    }
}
