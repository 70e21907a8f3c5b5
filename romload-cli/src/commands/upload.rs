//! Upload command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use romload::port::DEFAULT_BAUD;
use romload::{
    CommandChannel, ConsoleEcho, MemoryImage, NativePort, NativePortEnumerator, Phase,
    PortEnumerator, SerialConfig, UploadSession,
};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output};

/// Upload options after merging flags and configuration.
pub(crate) struct UploadArgs<'a> {
    pub(crate) image: &'a Path,
    pub(crate) verify: bool,
    pub(crate) follow: bool,
    pub(crate) timeout_secs: Option<u64>,
}

/// Resolve the serial port from flags/environment, then the config file.
fn resolve_port(cli: &Cli, config: &Config) -> Result<String> {
    if let Some(port) = cli
        .port
        .clone()
        .or_else(|| {
            config
                .connection
                .port
                .clone()
        })
    {
        return Ok(port);
    }

    let available: Vec<String> = NativePortEnumerator::list_ports()
        .map(|ports| {
            ports
                .into_iter()
                .map(|p| p.name)
                .collect()
        })
        .unwrap_or_default();
    let hint = if available.is_empty() {
        "no serial ports detected".to_string()
    } else {
        format!("available: {}", available.join(", "))
    };
    Err(CliError::Usage(format!(
        "no serial port given; pass --port or set ROMLOAD_PORT ({hint})"
    ))
    .into())
}

fn verify_progress_bar(cli: &Cli, total: usize) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} bytes")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Upload command: load the image, write it, verify it, reset the board.
pub(crate) fn cmd_upload(cli: &Cli, config: &Config, args: &UploadArgs<'_>) -> Result<()> {
    // Read here so a missing file is not reported as a transport failure
    let bytes = fs::read(args.image)
        .with_context(|| format!("Failed to load image {}", args.image.display()))?;
    let image = MemoryImage::from_bytes(bytes)
        .with_context(|| format!("Failed to load image {}", args.image.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes)",
            style("📦").cyan(),
            args.image.display(),
            image.len()
        );
    }

    let port_name = resolve_port(cli, config)?;
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD);
    let port = NativePort::open(&SerialConfig::new(&port_name, baud))
        .with_context(|| format!("Failed to open serial port {port_name}"))?;
    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style("🔌").cyan(),
            style(&port_name).green(),
            baud
        );
    }

    let mut channel = CommandChannel::new(port, ConsoleEcho::new(io::stdout()))
        .with_reply_timeout(args.timeout_secs.map(Duration::from_secs));

    let pb = verify_progress_bar(cli, image.len());
    let quiet = cli.quiet;
    let verify = args.verify;

    let outcome = UploadSession::new(&mut channel).run(&image, verify, |phase, done, total| {
        match phase {
            Phase::Write => {
                if !quiet {
                    eprintln!("{} Dump has been written to memory", style("[+]").green());
                    if verify {
                        eprintln!("{} Verifying dump...", style("[~]").yellow());
                    }
                }
            },
            Phase::Verify => {
                pb.set_position(done as u64);
                if done == total {
                    pb.finish_and_clear();
                    if !quiet {
                        eprintln!("{} All good!", style("[+]").green());
                    }
                }
            },
            Phase::Reset => {
                if !quiet {
                    eprintln!("{} Reset i8080...", style("[+]").green());
                }
            },
        }
    });

    if let Err(err) = outcome {
        pb.abandon();
        let _ = channel.close();
        return Err(err).with_context(|| format!("Upload to {port_name} failed"));
    }

    if args.follow {
        if !quiet {
            eprintln!(
                "{} Output from i8080 (Ctrl-C to exit):",
                style("[~]").yellow()
            );
        }
        channel
            .follow()
            .with_context(|| format!("Lost connection to {port_name}"))?;
        if !quiet {
            eprintln!();
        }
    }

    channel.close()?;
    Ok(())
}
