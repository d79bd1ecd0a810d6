#![deny(unsafe_code)]

//! Volume Autogrow (vag): grows cloud block-storage volumes attached to a
//! running instance once local disk usage crosses a threshold, then extends
//! the partition and filesystem online.
//!
//! Per disk a run walks four stages in order:
//! 1. **Scan**: mounted block devices joined with usage and backing volume
//! 2. **Volume**: request the new size and wait for the provider to apply it
//! 3. **Partition**: `growpart` the partition to the end of the disk
//! 4. **Filesystem**: `xfs_growfs` or `resize2fs` to fill the partition
//!
//! # Library usage
//!
//! ```rust,no_run
//! use volume_autogrow::prelude::*;
//!
//! let report = resize_disk(20.0, 85.0)?;
//! println!("{} disks grown", report.count("grown"));
//! # Ok::<(), VagError>(())
//! ```

pub mod prelude;

pub mod cloud;
pub mod core;
pub mod logger;
pub mod platform;
pub mod resize;
