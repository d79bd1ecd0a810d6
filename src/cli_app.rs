//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use volume_autogrow::core::config::{Config, ErrorPolicy};
use volume_autogrow::core::errors::VagError;
use volume_autogrow::core::shutdown::ShutdownSignal;
use volume_autogrow::resize::orchestrator::{DiskOutcome, DiskReport, RunReport};
use volume_autogrow::resize::run_with_config;

/// Grow cloud block volumes, their partitions, and their filesystems when
/// disk usage crosses a threshold.
#[derive(Debug, Parser)]
#[command(
    name = "vag",
    author,
    version,
    about = "Volume Autogrow - online EBS volume expansion",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run one resize pass over every mounted cloud volume.
    Run(ResizeArgs),
    /// Show what a resize pass would do without changing anything.
    Plan(ResizeArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct ResizeArgs {
    /// Percentage to add to each grown volume.
    #[arg(long, value_name = "PERCENT")]
    increase_percent: Option<f64>,
    /// Grow disks whose usage is at or above this percentage.
    #[arg(long, value_name = "PERCENT")]
    threshold: Option<f64>,
    /// Report decisions without touching volumes or running tools.
    #[arg(long)]
    dry_run: bool,
    /// Record per-disk failures and keep going instead of aborting.
    #[arg(long)]
    continue_on_error: bool,
    /// Longest wait for a volume modification, in seconds.
    #[arg(long, value_name = "SECONDS")]
    max_wait_secs: Option<u64>,
    /// Delay between modification status checks, in seconds.
    #[arg(long, value_name = "SECONDS")]
    poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid configuration or arguments.
    #[error("{0}")]
    User(String),
    /// The run failed.
    #[error("{0}")]
    Runtime(String),
    /// The run finished but at least one disk failed.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Runtime(_) | Self::Json(_) | Self::Io(_) => 1,
            Self::User(_) => 2,
            Self::Partial(_) => 3,
        }
    }
}

impl From<VagError> for CliError {
    fn from(err: VagError) -> Self {
        match err {
            VagError::InvalidConfig { .. }
            | VagError::MissingConfig { .. }
            | VagError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_resize(cli, args, false),
        Command::Plan(args) => run_resize(cli, args, true),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn run_resize(cli: &Cli, args: &ResizeArgs, plan: bool) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    apply_resize_args(&mut config, args, plan);

    let report = run_with_config(&config, ShutdownSignal::with_os_signals())?;
    let command = if report.dry_run { "plan" } else { "run" };

    match output_mode(cli) {
        OutputMode::Human => print!("{}", render_report(&report)),
        OutputMode::Json => {
            let payload = json!({
                "command": command,
                "report": serde_json::to_value(&report)?,
            });
            write_json_line(&payload)?;
        }
    }

    if report.has_failures() {
        return Err(CliError::Partial(format!(
            "{} of {} disks failed",
            report.count("failed"),
            report.disks.len()
        )));
    }
    Ok(())
}

fn apply_resize_args(config: &mut Config, args: &ResizeArgs, plan: bool) {
    if let Some(pct) = args.increase_percent {
        config.resize.increase_percent = pct;
    }
    if let Some(pct) = args.threshold {
        config.resize.threshold_percent = pct;
    }
    if plan || args.dry_run {
        config.resize.dry_run = true;
    }
    if args.continue_on_error {
        config.resize.error_policy = ErrorPolicy::Continue;
    }
    if let Some(secs) = args.max_wait_secs {
        config.poll.max_wait_secs = secs;
    }
    if let Some(secs) = args.poll_interval_secs {
        config.poll.interval_secs = secs;
    }
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => {
            let config = Config::load(cli.config.as_deref())?;
            let hash = config.stable_hash()?;

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("Configuration is valid.");
                    println!("  Source: {}", config.paths.config_file.display());
                    println!("  Hash: {hash}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config validate",
                        "valid": true,
                        "source": config.paths.config_file.to_string_lossy(),
                        "hash": hash,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

fn render_report(report: &RunReport) -> String {
    let mut out = format!(
        "{} {} disk(s), increase {}%, threshold {}%{}\n",
        (if report.dry_run { "Plan:" } else { "Run:" }).bold(),
        report.disks.len(),
        report.increase_percent,
        report.threshold_percent,
        if report.dry_run { " (dry run)" } else { "" }
    );
    for disk in &report.disks {
        out.push_str(&render_disk(disk));
        out.push('\n');
    }
    out
}

fn render_disk(disk: &DiskReport) -> String {
    let usage = disk
        .used_pct
        .map_or_else(|| "-".to_string(), |pct| format!("{pct:.1}%"));
    let volume = disk.volume_id.as_deref().unwrap_or("-");
    let size = disk.size_gib.unwrap_or_default();
    let detail = match &disk.outcome {
        DiskOutcome::BelowThreshold { threshold_percent } => {
            format!("below {threshold_percent}%").dimmed().to_string()
        }
        DiskOutcome::Unsupported => "not a cloud volume".dimmed().to_string(),
        DiskOutcome::Deferred { code, .. } => format!("deferred ({code})").yellow().to_string(),
        DiskOutcome::Planned { target_gib } => {
            format!("would grow {size} -> {target_gib} GiB").cyan().to_string()
        }
        DiskOutcome::Grown {
            target_gib, tool, ..
        } => format!("grown {size} -> {target_gib} GiB ({tool:?})")
            .green()
            .to_string(),
        DiskOutcome::Failed { code, message } => {
            format!("failed [{code}] {message}").red().to_string()
        }
    };
    format!(
        "  {:<18} {:<16} {:<22} {:>6}  {detail}",
        disk.device,
        disk.mount_point.display(),
        volume,
        usage
    )
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("VAG_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
