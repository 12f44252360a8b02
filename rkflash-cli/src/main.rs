//! rkflash CLI - Command-line tool for Rockchip devices in bootloader mode.
//!
//! ## Features
//!
//! - Read, write and erase flash by sector range or partition name
//! - IDB and device RAM access, code execution
//! - Parameter block and partition table handling
//! - RKAF, RKFW and RKFP firmware inspection and extraction
//! - Interactive device selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

mod commands;
mod config;
mod device;

use config::Config;
use device::{DeviceAddress, parse_device_address};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Failures that belong to the command line rather than the device.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad invocation or an ambiguous selection.
    #[error("{0}")]
    Usage(String),

    /// The user backed out of a prompt.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    /// Process exit code for this error.
    pub(crate) fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

/// rkflash - A cross-platform tool for Rockchip devices in bootloader mode.
///
/// Environment variables:
///   RKFLASH_DEVICE              - Device to use (BUS:ADDR)
///   RKFLASH_TIMEOUT             - USB transfer timeout in milliseconds
///   RKFLASH_NON_INTERACTIVE     - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "rkflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Device to use as BUS:ADDR (auto-detected if not specified).
    #[arg(short, long, global = true, env = "RKFLASH_DEVICE", value_parser = parse_device_address)]
    device: Option<DeviceAddress>,

    /// USB transfer timeout in milliseconds.
    #[arg(long, global = true, env = "RKFLASH_TIMEOUT", value_name = "MS")]
    timeout: Option<u64>,

    /// Talk to an in-memory emulated device instead of USB.
    #[arg(long, global = true)]
    dummy: bool,

    /// Emulated device with flash preloaded from a file (implies --dummy).
    #[arg(long, global = true, value_name = "FILE")]
    dummy_flash: Option<PathBuf>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "RKFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Flash span given as a sector range or a partition name.
#[derive(Args, Debug, Clone)]
pub(crate) struct FlashTarget {
    /// First sector.
    #[arg(value_parser = parse_number, required_unless_present = "partition")]
    offset: Option<u32>,

    /// Number of sectors.
    #[arg(value_parser = parse_number, required_unless_present = "partition")]
    size: Option<u32>,

    /// Partition name from the device's parameter block.
    #[arg(short, long, conflicts_with_all = ["offset", "size"])]
    partition: Option<String>,
}

/// A start and a length.
#[derive(Args, Debug, Clone, Copy)]
pub(crate) struct Span {
    /// Start offset.
    #[arg(value_parser = parse_number)]
    offset: u32,

    /// Length.
    #[arg(value_parser = parse_number)]
    size: u32,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Reboot the device.
    Reboot {
        /// Reboot into the boot ROM instead of normal boot.
        #[arg(long)]
        maskrom: bool,
    },

    /// Show flash ID, flash geometry and chip info.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Read flash sectors.
    Read {
        #[command(flatten)]
        target: FlashTarget,

        /// Output file (stdout if not specified).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write flash sectors.
    Write {
        #[command(flatten)]
        target: FlashTarget,

        /// Input file (stdin if not specified).
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Erase flash sectors (fill with 0xFF).
    Erase {
        #[command(flatten)]
        target: FlashTarget,
    },

    /// Read IDB blocks (OFFSET and SIZE in 0x210-byte blocks).
    ReadIdb {
        #[command(flatten)]
        span: Span,

        /// Output file (stdout if not specified).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write IDB blocks (OFFSET and SIZE in 0x210-byte blocks).
    WriteIdb {
        #[command(flatten)]
        span: Span,

        /// Input file (stdin if not specified).
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Read device RAM (ADDRESS and SIZE in bytes).
    ReadMem {
        #[command(flatten)]
        span: Span,

        /// Output file (stdout if not specified).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write device RAM (ADDRESS and SIZE in bytes).
    WriteMem {
        #[command(flatten)]
        span: Span,

        /// Input file (stdin if not specified).
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Jump to code in device RAM.
    ExecMem {
        /// Entry address.
        #[arg(value_parser = parse_number)]
        address: u32,
    },

    /// Read the parameter block text.
    ReadParams {
        /// Output file (stdout if not specified).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write the parameter block from a text file.
    WriteParams {
        /// Input file (stdin if not specified).
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// List partitions from the device's parameter block.
    Partitions {
        /// Output partitions as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Extract every file from an RKAF, RKFW or RKFP image.
    Unpack {
        /// Firmware image.
        image: PathBuf,

        /// Output directory.
        #[arg(short = 'C', long = "directory", value_name = "DIR")]
        directory: Option<PathBuf>,
    },

    /// Show the contents of an RKAF, RKFW or RKFP image.
    Inspect {
        /// Firmware image.
        image: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Add a CRC trailer (and a KRNL or PARM header) to an image.
    Wrap {
        /// Add a KRNL header.
        #[arg(long, conflicts_with = "param")]
        kernel: bool,

        /// Add a PARM header.
        #[arg(long)]
        param: bool,

        /// Input file.
        input: PathBuf,

        /// Output file.
        output: PathBuf,
    },

    /// List attached Rockchip devices.
    ListDevices {
        /// Output device list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

/// Parse a number in C notation: `0x` hex, leading `0` octal, else decimal.
///
/// Unlike the partition table parser, the whole argument must be a number.
fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None if s.len() > 1 && s.starts_with('0') => (&s[1..], 8),
        None => (s, 10),
    };
    u32::from_str_radix(digits, radix).map_err(|e| format!("Invalid number '{s}': {e}"))
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "rkflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

/// Setup logging based on verbosity.
fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

/// Map an error to the process exit code.
///
/// Partition table problems only abort the current command and exit with 2,
/// like usage errors. Everything else is fatal and exits with 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return cli_err.exit_code();
        }
        if let Some(lib_err) = cause.downcast_ref::<rkflash::Error>() {
            return if lib_err.is_soft() { 2 } else { 1 };
        }
    }
    1
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Reboot { maskrom } => commands::flash::cmd_reboot(cli, &config, *maskrom),
        Commands::Info { json } => commands::flash::cmd_info(cli, &config, *json),
        Commands::Read { target, output } => {
            commands::flash::cmd_read(cli, &config, target, output.as_deref())
        },
        Commands::Write { target, input } => {
            commands::flash::cmd_write(cli, &config, target, input.as_deref())
        },
        Commands::Erase { target } => commands::flash::cmd_erase(cli, &config, target),
        Commands::ReadIdb { span, output } => {
            commands::flash::cmd_read_idb(cli, &config, *span, output.as_deref())
        },
        Commands::WriteIdb { span, input } => {
            commands::flash::cmd_write_idb(cli, &config, *span, input.as_deref())
        },
        Commands::ReadMem { span, output } => {
            commands::flash::cmd_read_mem(cli, &config, *span, output.as_deref())
        },
        Commands::WriteMem { span, input } => {
            commands::flash::cmd_write_mem(cli, &config, *span, input.as_deref())
        },
        Commands::ExecMem { address } => commands::flash::cmd_exec_mem(cli, &config, *address),
        Commands::ReadParams { output } => {
            commands::params::cmd_read_params(cli, &config, output.as_deref())
        },
        Commands::WriteParams { input } => {
            commands::params::cmd_write_params(cli, &config, input.as_deref())
        },
        Commands::Partitions { json } => commands::params::cmd_partitions(cli, &config, *json),
        Commands::Unpack { image, directory } => {
            let out_dir = directory
                .clone()
                .or_else(|| config.unpack.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from("."));
            commands::image::cmd_unpack(cli, image, &out_dir)
        },
        Commands::Inspect { image, json } => commands::info::cmd_inspect(image, *json),
        Commands::Wrap {
            kernel,
            param,
            input,
            output,
        } => commands::image::cmd_wrap(cli, *kernel, *param, input, output),
        Commands::ListDevices { json } => commands::info::cmd_list_devices(*json),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: rkflash completions bash \
                         (or use rkflash completions --install)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

/// Print a status line to stderr unless quiet.
pub(crate) fn status(cli: &Cli, icon: &str, message: impl std::fmt::Display) {
    if cli.quiet {
        return;
    }
    if use_fancy_output() {
        eprintln!("{icon} {message}");
    } else {
        eprintln!("{message}");
    }
}

/// Progress bar for a transfer of `total` units, hidden when quiet or not a terminal.
pub(crate) fn progress_bar(cli: &Cli, total: u32, unit: &str) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(u64::from(total));
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message(unit.to_string());
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_read_range() {
        let cli = Cli::try_parse_from(["rkflash", "read", "0x2000", "0x100", "-o", "out.bin"])
            .unwrap();
        if let Commands::Read { target, output } = cli.command {
            assert_eq!(target.offset, Some(0x2000));
            assert_eq!(target.size, Some(0x100));
            assert!(target.partition.is_none());
            assert_eq!(output.unwrap().to_str().unwrap(), "out.bin");
        } else {
            panic!("Expected Read command");
        }
    }

    #[test]
    fn test_cli_parse_read_partition() {
        let cli = Cli::try_parse_from(["rkflash", "read", "--partition", "boot"]).unwrap();
        if let Commands::Read { target, output } = cli.command {
            assert_eq!(target.partition.as_deref(), Some("boot"));
            assert!(target.offset.is_none());
            assert!(output.is_none());
        } else {
            panic!("Expected Read command");
        }
    }

    #[test]
    fn test_cli_read_needs_range_or_partition() {
        assert!(Cli::try_parse_from(["rkflash", "read"]).is_err());
        assert!(Cli::try_parse_from(["rkflash", "read", "0x10"]).is_err());
        assert!(Cli::try_parse_from(["rkflash", "read", "0", "1", "-p", "boot"]).is_err());
    }

    #[test]
    fn test_cli_parse_write_mem() {
        let cli = Cli::try_parse_from([
            "rkflash",
            "write-mem",
            "0x60000000",
            "4096",
            "-i",
            "ddr.bin",
        ])
        .unwrap();
        if let Commands::WriteMem { span, input } = cli.command {
            assert_eq!(span.offset, 0x6000_0000);
            assert_eq!(span.size, 4096);
            assert_eq!(input.unwrap().to_str().unwrap(), "ddr.bin");
        } else {
            panic!("Expected WriteMem command");
        }
    }

    #[test]
    fn test_cli_parse_reboot() {
        let cli = Cli::try_parse_from(["rkflash", "reboot", "--maskrom"]).unwrap();
        assert!(matches!(cli.command, Commands::Reboot { maskrom: true }));
    }

    #[test]
    fn test_cli_parse_wrap_conflict() {
        assert!(Cli::try_parse_from(["rkflash", "wrap", "--kernel", "a", "b"]).is_ok());
        assert!(Cli::try_parse_from(["rkflash", "wrap", "--kernel", "--param", "a", "b"]).is_err());
    }

    #[test]
    fn test_cli_parse_unpack_directory() {
        let cli = Cli::try_parse_from(["rkflash", "unpack", "update.img", "-C", "out"]).unwrap();
        if let Commands::Unpack { image, directory } = cli.command {
            assert_eq!(image.to_str().unwrap(), "update.img");
            assert_eq!(directory.unwrap().to_str().unwrap(), "out");
        } else {
            panic!("Expected Unpack command");
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "rkflash",
            "--device",
            "3:12",
            "--timeout",
            "2000",
            "-vv",
            "--quiet",
            "--non-interactive",
            "--config",
            "/tmp/config.toml",
            "list-devices",
        ])
        .unwrap();
        let device = cli.device.unwrap();
        assert_eq!(device.bus, "3");
        assert_eq!(device.address, 12);
        assert_eq!(cli.timeout, Some(2000));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
        assert!(!cli.dummy);
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["rkflash"]).is_err());
    }

    // ---- parse_number ----

    #[test]
    fn test_parse_number_forms() {
        assert_eq!(parse_number("0x2000").unwrap(), 0x2000);
        assert_eq!(parse_number("0X1f").unwrap(), 0x1F);
        assert_eq!(parse_number("010").unwrap(), 8);
        assert_eq!(parse_number("0").unwrap(), 0);
        assert_eq!(parse_number("4096").unwrap(), 4096);
    }

    #[test]
    fn test_parse_number_invalid() {
        assert!(parse_number("").is_err());
        assert!(parse_number("0x").is_err());
        assert!(parse_number("12k").is_err());
        assert!(parse_number("09").is_err());
        assert!(parse_number("0x1FFFFFFFF").is_err());
        assert!(parse_number("4294967296").is_err());
    }

    // ---- exit codes ----

    #[test]
    fn test_exit_code_mapping() {
        let soft: anyhow::Error =
            rkflash::Error::from(rkflash::error::SyntaxError::MissingMtdparts).into();
        assert_eq!(exit_code(&soft), 2);

        let soft = soft.context("Failed to resolve partition");
        assert_eq!(exit_code(&soft), 2);

        let fatal: anyhow::Error = rkflash::Error::DeviceNotFound.into();
        assert_eq!(exit_code(&fatal), 1);

        let usage: anyhow::Error = CliError::Usage("bad".into()).into();
        assert_eq!(exit_code(&usage), 2);

        let cancelled: anyhow::Error = CliError::Cancelled("no".into()).into();
        assert_eq!(exit_code(&cancelled), 130);

        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }
}
