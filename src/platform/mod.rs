//! Platform abstraction layer: mounts, usage statistics, device descriptors,
//! external programs.

pub mod nvme;
pub mod pal;
pub mod process;
