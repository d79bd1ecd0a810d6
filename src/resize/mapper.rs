//! Local block device → backing cloud volume resolution.

#![allow(missing_docs)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cloud::ec2::{Volume, VolumeService};
use crate::core::errors::{Result, VagError};
use crate::platform::nvme::DeviceDescriptorProbe;
use crate::resize::device::DeviceName;

/// A device together with the single volume attached behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMapping {
    /// Attachment slot that matched.
    pub slot: String,
    pub volume: Volume,
}

pub struct DeviceMapper {
    volumes: Arc<dyn VolumeService>,
    nvme: Arc<dyn DeviceDescriptorProbe>,
    instance_id: String,
}

impl DeviceMapper {
    pub fn new(
        volumes: Arc<dyn VolumeService>,
        nvme: Arc<dyn DeviceDescriptorProbe>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            volumes,
            nvme,
            instance_id: instance_id.into(),
        }
    }

    /// Resolve `device` to exactly one attached volume.
    ///
    /// Zero matches across every candidate slot is [`VagError::Mapping`];
    /// more than one match on a slot is [`VagError::AmbiguousMapping`].
    pub fn resolve(&self, device: &DeviceName) -> Result<VolumeMapping> {
        let mut expected_volume = None;
        let slots = match device {
            DeviceName::Nvme { parent, .. } => {
                let descriptor = self.nvme.describe(parent)?;
                eprintln!(
                    "[VAG-MAP] {device}: controller reports slot {} ({})",
                    descriptor.slot, descriptor.volume_id
                );
                expected_volume = Some(descriptor.volume_id);
                vec![descriptor.slot]
            }
            DeviceName::Lettered { .. } => device.legacy_slot_candidates(),
            DeviceName::Unsupported { path } => {
                return Err(VagError::Mapping {
                    device: path.clone(),
                    slot: "<unrecognized device name>".to_string(),
                });
            }
        };

        for slot in &slots {
            let mut found = self.volumes.describe_volumes(slot, &self.instance_id)?;
            match found.len() {
                0 => continue,
                1 => {
                    let volume = found.remove(0);
                    if let Some(expected) = &expected_volume
                        && expected != &volume.volume_id
                    {
                        eprintln!(
                            "[VAG-MAP] warning: {device} controller serial names {expected}, \
                             provider reports {}",
                            volume.volume_id
                        );
                    }
                    return Ok(VolumeMapping {
                        slot: slot.clone(),
                        volume,
                    });
                }
                count => {
                    return Err(VagError::AmbiguousMapping {
                        device: device.path().to_string(),
                        slot: slot.clone(),
                        count,
                        volume_ids: found.into_iter().map(|v| v.volume_id).collect(),
                    });
                }
            }
        }

        Err(VagError::Mapping {
            device: device.path().to_string(),
            slot: slots.join(", "),
        })
    }
}
