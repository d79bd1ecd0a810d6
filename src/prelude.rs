//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use volume_autogrow::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, ErrorPolicy};
pub use crate::core::errors::{Result, VagError};
pub use crate::core::shutdown::ShutdownSignal;

// Platform
pub use crate::platform::pal::{FsStats, MountPoint, Platform, detect_platform};
pub use crate::platform::process::{CommandOutput, CommandRunner};

// Cloud
pub use crate::cloud::ec2::{ModificationState, Volume, VolumeService};
pub use crate::cloud::metadata::{IdentityResolver, InstanceIdentity};

// Resize
pub use crate::resize::device::DeviceName;
pub use crate::resize::orchestrator::{DiskOutcome, Orchestrator, RunReport};
pub use crate::resize::usage::DiskRecord;
pub use crate::resize::{resize_disk, run_with_config};
