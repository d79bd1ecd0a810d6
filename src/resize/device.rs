//! Block device naming grammar.
//!
//! Three conventions are recognized:
//! - NVMe namespaces: `/dev/nvme<ctrl>n<ns>` with optional `p<part>` suffix.
//! - Lettered disks: `/dev/{xvd,sd,hd}<letters>` with optional trailing digits.
//! - Anything else is [`DeviceName::Unsupported`] and is never resized.

#![allow(missing_docs)]

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static NVME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(/dev/nvme\d+n\d+)(?:p(\d+))?$").expect("static regex is valid")
});

static LETTERED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(/dev/(?:xvd|sd|hd)[a-z]+)(\d+)?$").expect("static regex is valid")
});

const XEN_PREFIX: &str = "/dev/xvd";
const LEGACY_PREFIX: &str = "/dev/sd";

/// A parsed local block device path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceName {
    /// Exposed over NVMe; the attachment slot must be read from the controller.
    Nvme {
        path: String,
        parent: String,
        partition: Option<u32>,
    },
    /// Keeps the attachment naming, modulo the `xvd` → `sd` prefix.
    Lettered {
        path: String,
        parent: String,
        partition: Option<u32>,
    },
    Unsupported { path: String },
}

impl DeviceName {
    #[must_use]
    pub fn parse(path: &str) -> Self {
        if let Some(caps) = NVME.captures(path) {
            return Self::Nvme {
                path: path.to_string(),
                parent: caps[1].to_string(),
                partition: caps.get(2).and_then(|m| m.as_str().parse().ok()),
            };
        }
        if let Some(caps) = LETTERED.captures(path) {
            return Self::Lettered {
                path: path.to_string(),
                parent: caps[1].to_string(),
                partition: caps.get(2).and_then(|m| m.as_str().parse().ok()),
            };
        }
        Self::Unsupported {
            path: path.to_string(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Nvme { path, .. } | Self::Lettered { path, .. } | Self::Unsupported { path } => {
                path
            }
        }
    }

    /// Whole-disk device; `None` for unsupported names.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        match self {
            Self::Nvme { parent, .. } | Self::Lettered { parent, .. } => Some(parent),
            Self::Unsupported { .. } => None,
        }
    }

    #[must_use]
    pub fn partition(&self) -> Option<u32> {
        match self {
            Self::Nvme { partition, .. } | Self::Lettered { partition, .. } => *partition,
            Self::Unsupported { .. } => None,
        }
    }

    #[must_use]
    pub fn is_whole_disk(&self) -> bool {
        self.is_supported() && self.partition().is_none()
    }

    #[must_use]
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported { .. })
    }

    #[must_use]
    pub fn is_virtualized(&self) -> bool {
        matches!(self, Self::Nvme { .. })
    }

    /// Attachment slots to try, most specific first.
    ///
    /// Lettered devices are looked up by their own path translated to the
    /// `/dev/sd*` convention, then by the whole-disk path, then untranslated.
    /// NVMe devices have no local naming to translate and yield nothing.
    #[must_use]
    pub fn legacy_slot_candidates(&self) -> Vec<String> {
        let Self::Lettered { path, parent, .. } = self else {
            return Vec::new();
        };
        let mut slots: Vec<String> = Vec::with_capacity(4);
        for candidate in [
            legacy_slot(path),
            legacy_slot(parent),
            path.clone(),
            parent.clone(),
        ] {
            if !slots.contains(&candidate) {
                slots.push(candidate);
            }
        }
        slots
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Translate a Xen-style `/dev/xvd*` path to the `/dev/sd*` slot convention.
#[must_use]
pub fn legacy_slot(path: &str) -> String {
    match path.strip_prefix(XEN_PREFIX) {
        Some(rest) => format!("{LEGACY_PREFIX}{rest}"),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn nvme_partition_splits_on_p_suffix() {
        let dev = DeviceName::parse("/dev/nvme1n1p1");
        assert!(dev.is_virtualized());
        assert_eq!(dev.parent(), Some("/dev/nvme1n1"));
        assert_eq!(dev.partition(), Some(1));
        assert!(!dev.is_whole_disk());
    }

    #[test]
    fn nvme_namespace_is_whole_disk() {
        let dev = DeviceName::parse("/dev/nvme2n1");
        assert!(dev.is_virtualized());
        assert!(dev.is_whole_disk());
        assert_eq!(dev.parent(), Some("/dev/nvme2n1"));
        assert!(dev.legacy_slot_candidates().is_empty());
    }

    #[test]
    fn lettered_partition_splits_on_first_digit() {
        let dev = DeviceName::parse("/dev/xvdf1");
        assert_eq!(dev.parent(), Some("/dev/xvdf"));
        assert_eq!(dev.partition(), Some(1));
        assert!(!dev.is_virtualized());
    }

    #[test]
    fn lettered_multi_letter_and_multi_digit() {
        let dev = DeviceName::parse("/dev/xvdba12");
        assert_eq!(dev.parent(), Some("/dev/xvdba"));
        assert_eq!(dev.partition(), Some(12));
    }

    #[test]
    fn lettered_without_digits_is_whole_disk() {
        let dev = DeviceName::parse("/dev/xvdf");
        assert!(dev.is_whole_disk());
        assert_eq!(dev.partition(), None);
    }

    #[test]
    fn xen_device_maps_to_legacy_slot() {
        assert_eq!(legacy_slot("/dev/xvdf"), "/dev/sdf");
        assert_eq!(legacy_slot("/dev/sdf"), "/dev/sdf");
        assert_eq!(
            DeviceName::parse("/dev/xvdf").legacy_slot_candidates()[0],
            "/dev/sdf"
        );
    }

    #[test]
    fn slot_candidates_cover_partition_and_parent() {
        let slots = DeviceName::parse("/dev/xvda1").legacy_slot_candidates();
        assert_eq!(
            slots,
            vec!["/dev/sda1", "/dev/sda", "/dev/xvda1", "/dev/xvda"]
        );
        let slots = DeviceName::parse("/dev/sdf").legacy_slot_candidates();
        assert_eq!(slots, vec!["/dev/sdf"]);
    }

    #[test]
    fn other_devices_are_unsupported() {
        for path in [
            "/dev/loop0",
            "/dev/mapper/vg0-root",
            "/dev/md0",
            "/dev/nvme0n1p",
            "overlay",
        ] {
            let dev = DeviceName::parse(path);
            assert!(!dev.is_supported(), "{path} should be unsupported");
            assert_eq!(dev.parent(), None);
            assert!(!dev.is_whole_disk());
        }
    }

    proptest! {
        #[test]
        fn nvme_grammar_round_trips(ctrl in 0u32..64, ns in 1u32..16, part in proptest::option::of(1u32..128)) {
            let parent = format!("/dev/nvme{ctrl}n{ns}");
            let path = match part {
                Some(p) => format!("{parent}p{p}"),
                None => parent.clone(),
            };
            let dev = DeviceName::parse(&path);
            prop_assert!(dev.is_virtualized());
            prop_assert_eq!(dev.parent(), Some(parent.as_str()));
            prop_assert_eq!(dev.partition(), part);
            prop_assert_eq!(dev.path(), path.as_str());
        }

        #[test]
        fn lettered_grammar_round_trips(prefix in "(xvd|sd|hd)", letters in "[a-z]{1,2}", part in proptest::option::of(1u32..128)) {
            let parent = format!("/dev/{prefix}{letters}");
            let path = match part {
                Some(p) => format!("{parent}{p}"),
                None => parent.clone(),
            };
            let dev = DeviceName::parse(&path);
            prop_assert!(!dev.is_virtualized());
            prop_assert_eq!(dev.parent(), Some(parent.as_str()));
            prop_assert_eq!(dev.partition(), part);
        }
    }
}
