//! romload CLI - load ROM images into an i8080 FPGA board over serial.
//!
//! ## Features
//!
//! - Upload a memory image, optionally verifying it byte by byte
//! - Echo the board's console output, during and after the upload
//! - List available serial ports
//! - Configuration file and environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use log::debug;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars should be drawn (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors raised by the CLI itself, mapped to dedicated exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Missing or inconsistent arguments.
    #[error("{0}")]
    Usage(String),
}

/// romload - load ROM images into an i8080 FPGA board.
///
/// Environment variables:
///   ROMLOAD_PORT   - Default serial port
///   ROMLOAD_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "romload")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port of the board (e.g. /dev/ttyACM0, COM19).
    #[arg(short, long, global = true, env = "ROMLOAD_PORT")]
    pub(crate) port: Option<String>,

    /// Baud rate of the serial link.
    #[arg(short, long, global = true, env = "ROMLOAD_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress status output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Write an image to the board, optionally verify it, then reset.
    Upload {
        /// Path to the raw memory image (at most 65535 bytes).
        image: PathBuf,

        /// Read every byte back and compare it with the image.
        #[arg(long)]
        verify: bool,

        /// Keep printing board output after the reset until Ctrl-C.
        #[arg(long)]
        follow: bool,

        /// Seconds to wait for each acknowledgement (default: wait forever).
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if std::env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
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

    debug!(
        "romload v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    romload::set_interrupt_checker(was_interrupted);

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    if let Err(err) = run(&cli, &config) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Upload {
            image,
            verify,
            follow,
            timeout,
        } => commands::upload::cmd_upload(
            cli,
            config,
            &commands::upload::UploadArgs {
                image,
                verify: *verify || config.upload.verify,
                follow: *follow || config.upload.follow,
                timeout_secs: timeout.or(config.upload.timeout_secs),
            },
        ),
        Commands::ListPorts { json } => commands::list_ports::cmd_list_ports(*json),
    }
}

/// Map an error to the process exit code.
///
/// 2 usage, 4 transport, 5 verification mismatch, 130 cancelled, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<CliError>().is_some() {
        return 2;
    }
    match err.downcast_ref::<romload::Error>() {
        Some(romload::Error::VerificationMismatch { .. }) => 5,
        Some(romload::Error::Interrupted) => 130,
        Some(e) if e.is_transport() => 4,
        _ => 1,
    }
}
