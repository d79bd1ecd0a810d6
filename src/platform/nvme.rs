//! NVMe identify-controller probe: recovers the attachment slot name that the
//! block-storage service records for an NVMe-exposed volume.
//!
//! The volume service writes the original slot name (`sdf`, `/dev/xvdf`, ...)
//! into the vendor-specific region of the identify-controller page, and the
//! volume id into the serial number with the dash stripped.

#![allow(missing_docs)]
#![allow(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VagError};

/// Model number reported by block-storage volumes.
pub const EBS_MODEL: &str = "Amazon Elastic Block Store";

#[cfg(test)]
pub(crate) const INSTANCE_STORE_MODEL: &str = "Amazon EC2 NVMe Instance Storage";

const IDENTIFY_LEN: usize = 4096;
const SERIAL_RANGE: std::ops::Range<usize> = 4..24;
const MODEL_RANGE: std::ops::Range<usize> = 24..64;
const BDEV_RANGE: std::ops::Range<usize> = 3072..3104;

/// Identity recovered from an NVMe controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvmeDescriptor {
    /// Attachment slot, always `/dev/`-prefixed.
    pub slot: String,
    pub volume_id: String,
    pub model: String,
}

/// Resolves the attachment descriptor of an NVMe device.
pub trait DeviceDescriptorProbe: Send + Sync {
    fn describe(&self, device: &str) -> Result<NvmeDescriptor>;
}

/// Decode an identify-controller page.
pub fn parse_identify_controller(device: &str, page: &[u8]) -> Result<NvmeDescriptor> {
    if page.len() < IDENTIFY_LEN {
        return Err(VagError::DeviceDescriptor {
            device: device.to_string(),
            details: format!(
                "identify page is {} bytes, expected {IDENTIFY_LEN}",
                page.len()
            ),
        });
    }

    let model = ascii_field(&page[MODEL_RANGE]);
    if model != EBS_MODEL {
        return Err(VagError::NotBlockStorage {
            device: device.to_string(),
            model,
        });
    }

    let bdev = ascii_field(&page[BDEV_RANGE]);
    if bdev.is_empty() {
        return Err(VagError::DeviceDescriptor {
            device: device.to_string(),
            details: "vendor block carries no attachment slot".to_string(),
        });
    }
    let slot = if bdev.starts_with("/dev/") {
        bdev
    } else {
        format!("/dev/{bdev}")
    };

    let serial = ascii_field(&page[SERIAL_RANGE]);
    let volume_id = match serial.strip_prefix("vol") {
        Some(rest) if !rest.starts_with('-') => format!("vol-{rest}"),
        _ => serial,
    };

    Ok(NvmeDescriptor {
        slot,
        volume_id,
        model,
    })
}

fn ascii_field(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// Linux implementation issuing `NVME_IOCTL_ADMIN_CMD`.
#[derive(Debug, Default)]
pub struct LinuxNvmeProbe;

#[cfg(target_os = "linux")]
mod ioctl {
    /// Mirrors `struct nvme_admin_cmd` from `<linux/nvme_ioctl.h>`.
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct NvmeAdminCmd {
        pub opcode: u8,
        pub flags: u8,
        pub rsvd1: u16,
        pub nsid: u32,
        pub cdw2: u32,
        pub cdw3: u32,
        pub metadata: u64,
        pub addr: u64,
        pub metadata_len: u32,
        pub data_len: u32,
        pub cdw10: u32,
        pub cdw11: u32,
        pub cdw12: u32,
        pub cdw13: u32,
        pub cdw14: u32,
        pub cdw15: u32,
        pub timeout_ms: u32,
        pub result: u32,
    }

    nix::ioctl_readwrite!(nvme_admin_cmd, b'N', 0x41, NvmeAdminCmd);

    pub const OPCODE_IDENTIFY: u8 = 0x06;
    pub const CNS_CONTROLLER: u32 = 1;
}

#[cfg(target_os = "linux")]
impl DeviceDescriptorProbe for LinuxNvmeProbe {
    fn describe(&self, device: &str) -> Result<NvmeDescriptor> {
        use std::fs::File;
        use std::os::fd::AsRawFd;

        let file = File::open(device).map_err(|source| VagError::io(device, source))?;
        let mut page = vec![0_u8; IDENTIFY_LEN];
        let mut cmd = ioctl::NvmeAdminCmd {
            opcode: ioctl::OPCODE_IDENTIFY,
            addr: page.as_mut_ptr() as u64,
            data_len: IDENTIFY_LEN as u32,
            cdw10: ioctl::CNS_CONTROLLER,
            ..ioctl::NvmeAdminCmd::default()
        };

        // SAFETY: `cmd` is a valid nvme_admin_cmd whose `addr` points at a live
        // buffer of `data_len` bytes that outlives the call.
        unsafe { ioctl::nvme_admin_cmd(file.as_raw_fd(), &mut cmd) }.map_err(|errno| {
            VagError::DeviceDescriptor {
                device: device.to_string(),
                details: format!("identify controller ioctl failed: {errno}"),
            }
        })?;

        parse_identify_controller(device, &page)
    }
}

#[cfg(not(target_os = "linux"))]
impl DeviceDescriptorProbe for LinuxNvmeProbe {
    fn describe(&self, device: &str) -> Result<NvmeDescriptor> {
        Err(VagError::UnsupportedPlatform {
            details: format!("NVMe identify is Linux-only ({device})"),
        })
    }
}

#[cfg(test)]
pub(crate) fn identify_page(serial: &str, model: &str, bdev: &str) -> Vec<u8> {
    let mut page = vec![0_u8; IDENTIFY_LEN];
    let mut put = |range: std::ops::Range<usize>, value: &str, pad: u8| {
        let field = &mut page[range];
        field.fill(pad);
        field[..value.len()].copy_from_slice(value.as_bytes());
    };
    put(SERIAL_RANGE, serial, b' ');
    put(MODEL_RANGE, model, b' ');
    put(BDEV_RANGE, bdev, b' ');
    page
}
