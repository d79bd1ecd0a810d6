//! Cloud-side volume growth: target sizing, the modify request, and the
//! bounded wait for the modification to leave the `modifying` state.
//!
//! Per disk the resizer walks `Idle → ResizeRequested → Modifying → Complete`,
//! or `ResizeRequested → Deferred` when the provider refuses with a rate-limit
//! or modification-state conflict. Deferral is not an error: the provider
//! enforces a cooldown between modifications, so a repeated run lands here.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cloud::ec2::{
    INCORRECT_MODIFICATION_STATE, ModificationState, RATE_EXCEEDED, VolumeService,
};
use crate::core::errors::{Result, VagError};
use crate::core::shutdown::ShutdownSignal;
use crate::resize::usage::DiskRecord;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Position in the per-disk resize state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeState {
    Idle,
    ResizeRequested,
    Modifying,
    Complete,
    Deferred,
}

impl fmt::Display for ResizeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::ResizeRequested => "resize_requested",
            Self::Modifying => "modifying",
            Self::Complete => "complete",
            Self::Deferred => "deferred",
        })
    }
}

/// How a resize attempt ended, short of a fatal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResizeOutcome {
    Complete {
        volume_id: String,
        target_gib: u64,
        final_state: ModificationState,
        waited_ms: u64,
    },
    /// Skip this disk until a later run.
    Deferred {
        volume_id: String,
        code: String,
        message: String,
    },
}

impl ResizeOutcome {
    #[must_use]
    pub fn state(&self) -> ResizeState {
        match self {
            Self::Complete { .. } => ResizeState::Complete,
            Self::Deferred { .. } => ResizeState::Deferred,
        }
    }
}

/// `size + size * increase_percent / 100`, in whole GiB, rounded down.
#[must_use]
pub fn target_size_gib(size_bytes: u64, increase_percent: f64) -> u64 {
    #[allow(clippy::cast_precision_loss)]
    let gib = size_bytes as f64 / GIB;
    let grown = gib + gib * increase_percent / 100.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        grown.floor().max(0.0) as u64
    }
}

/// Target for `record`, always strictly larger than the current volume.
///
/// Sized from whichever is larger, filesystem capacity or provisioned volume
/// size, since filesystem overhead makes the former slightly smaller.
#[must_use]
pub fn plan_target(record: &DiskRecord, increase_percent: f64) -> u64 {
    let volume_bytes = record.volume_size_gib.saturating_mul(1 << 30);
    let base = record.total_space_bytes.max(volume_bytes);
    target_size_gib(base, increase_percent).max(record.volume_size_gib.saturating_add(1))
}

/// Turn a provider refusal into a deferral when its code allows retrying later.
#[must_use]
pub fn classify_modify_error(volume_id: &str, err: VagError) -> VagError {
    match err {
        VagError::Provider {
            code: Some(code),
            details,
            ..
        } if code == RATE_EXCEEDED || code == INCORRECT_MODIFICATION_STATE => {
            VagError::ProviderDeferred {
                volume_id: volume_id.to_string(),
                code,
                message: details,
            }
        }
        other => other,
    }
}

pub struct VolumeResizer {
    volumes: Arc<dyn VolumeService>,
    interval: Duration,
    max_wait: Duration,
    shutdown: ShutdownSignal,
}

impl VolumeResizer {
    pub fn new(
        volumes: Arc<dyn VolumeService>,
        interval: Duration,
        max_wait: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            volumes,
            interval,
            max_wait,
            shutdown,
        }
    }

    /// Request `target_gib` for the volume behind `record` and wait for the
    /// provider to apply it.
    pub fn resize(&self, record: &DiskRecord, target_gib: u64) -> Result<ResizeOutcome> {
        let volume_id = record.volume_id.as_str();
        eprintln!(
            "[VAG-RESIZE] {volume_id}: {} -> {} ({} GiB -> {target_gib} GiB)",
            ResizeState::Idle,
            ResizeState::ResizeRequested,
            record.volume_size_gib
        );

        if let Err(err) = self.volumes.modify_volume(volume_id, target_gib) {
            return match classify_modify_error(volume_id, err) {
                VagError::ProviderDeferred {
                    volume_id,
                    code,
                    message,
                } => {
                    eprintln!(
                        "[VAG-RESIZE] {volume_id}: {} -> {} ({code}): {message}",
                        ResizeState::ResizeRequested,
                        ResizeState::Deferred
                    );
                    Ok(ResizeOutcome::Deferred {
                        volume_id,
                        code,
                        message,
                    })
                }
                fatal => Err(fatal),
            };
        }

        eprintln!(
            "[VAG-RESIZE] {volume_id}: {} -> {}",
            ResizeState::ResizeRequested,
            ResizeState::Modifying
        );
        let (final_state, waited) = self.wait_for_modification(volume_id)?;
        eprintln!(
            "[VAG-RESIZE] {volume_id}: {} -> {} after {waited:?}",
            ResizeState::Modifying,
            ResizeState::Complete
        );

        Ok(ResizeOutcome::Complete {
            volume_id: volume_id.to_string(),
            target_gib,
            final_state,
            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Poll until the newest modification is no longer `modifying`.
    ///
    /// Bounded by `max_wait`; a shutdown request ends the wait early.
    pub fn wait_for_modification(&self, volume_id: &str) -> Result<(ModificationState, Duration)> {
        let started = Instant::now();
        loop {
            if self.shutdown.is_requested() {
                return Err(self.cancelled(volume_id));
            }

            let state = self
                .volumes
                .describe_volume_modifications(volume_id)?
                .into_iter()
                .next()
                .ok_or_else(|| VagError::Provider {
                    operation: "describe-volumes-modifications",
                    code: None,
                    details: format!("no modification recorded for {volume_id}"),
                })?;

            match state {
                ModificationState::Failed => {
                    return Err(VagError::Provider {
                        operation: "describe-volumes-modifications",
                        code: None,
                        details: format!("modification of {volume_id} failed"),
                    });
                }
                ref s if s.is_in_progress() => {}
                done => return Ok((done, started.elapsed())),
            }

            let waited = started.elapsed();
            if waited >= self.max_wait {
                return Err(VagError::Timeout {
                    volume_id: volume_id.to_string(),
                    waited,
                });
            }
            let pause = self.interval.min(self.max_wait - waited);
            eprintln!("[VAG-RESIZE] {volume_id}: modification in progress, waiting {pause:?}");
            if !self.shutdown.sleep(pause) {
                return Err(self.cancelled(volume_id));
            }
        }
    }

    fn cancelled(&self, volume_id: &str) -> VagError {
        VagError::Cancelled {
            stage: format!("waiting for modification of {volume_id}"),
        }
    }
}
