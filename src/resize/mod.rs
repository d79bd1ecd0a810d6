//! Volume autogrow pipeline: scan, map, resize, grow partition, grow filesystem.

pub mod device;
pub mod filesystem;
pub mod mapper;
pub mod orchestrator;
pub mod partition;
pub mod usage;
pub mod volume;

use std::sync::Arc;

use crate::cloud::ec2::AwsCliVolumeService;
use crate::cloud::metadata::{ConfiguredIdentity, IdentityResolver};
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::core::shutdown::ShutdownSignal;
use crate::logger::jsonl::{JsonlConfig, JsonlWriter};
use crate::platform::nvme::LinuxNvmeProbe;
use crate::platform::pal::detect_platform;
use crate::platform::process::{CommandRunner, SystemCommandRunner};

use self::filesystem::FilesystemGrower;
use self::mapper::DeviceMapper;
use self::orchestrator::{Orchestrator, RunReport};
use self::partition::PartitionGrower;
use self::usage::UsageEvaluator;
use self::volume::VolumeResizer;

/// Wire the host implementations of every seam from `config`.
///
/// Contacts the instance metadata service unless both region and instance
/// id are configured.
pub fn build_orchestrator(config: &Config, shutdown: ShutdownSignal) -> Result<Orchestrator> {
    config.validate()?;
    eprintln!(
        "[VAG-RUN] config {} (hash {})",
        config.paths.config_file.display(),
        config.stable_hash()?
    );
    let identity = ConfiguredIdentity::from_config(&config.cloud)?.resolve()?;
    eprintln!(
        "[VAG-RUN] instance {} in {}",
        identity.instance_id, identity.region
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
    let volumes = Arc::new(AwsCliVolumeService::new(
        &config.cloud.aws_cli,
        &identity.region,
        Arc::clone(&runner),
    ));
    let mapper = DeviceMapper::new(
        volumes.clone(),
        Arc::new(LinuxNvmeProbe),
        identity.instance_id,
    );
    let evaluator = UsageEvaluator::new(detect_platform()?, mapper);
    let resizer = VolumeResizer::new(
        volumes,
        config.poll.interval(),
        config.poll.max_wait(),
        shutdown,
    );

    let orchestrator = Orchestrator::new(
        evaluator,
        resizer,
        PartitionGrower::new(Arc::clone(&runner), &config.tools.growpart),
        FilesystemGrower::new(runner, &config.tools),
        config.resize.clone(),
    );
    if config.resize.dry_run {
        return Ok(orchestrator);
    }
    Ok(orchestrator.with_activity_log(JsonlWriter::open(JsonlConfig::for_path(
        &config.paths.activity_log,
    ))))
}

/// One full pass with `config`.
pub fn run_with_config(config: &Config, shutdown: ShutdownSignal) -> Result<RunReport> {
    build_orchestrator(config, shutdown)?.run()
}

/// Grow every disk at or above `threshold_percent` utilization by
/// `increase_percent`, using the default configuration for everything else.
pub fn resize_disk(increase_percent: f64, threshold_percent: f64) -> Result<RunReport> {
    let mut config = Config::load(None)?;
    config.resize.increase_percent = increase_percent;
    config.resize.threshold_percent = threshold_percent;
    run_with_config(&config, ShutdownSignal::with_os_signals())
}
