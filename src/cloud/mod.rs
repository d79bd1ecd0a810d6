//! Cloud collaborators: instance identity and the block-storage volume service.

pub mod ec2;
pub mod metadata;
