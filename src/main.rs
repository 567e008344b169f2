//! gzdrop - send a file to a gzdropd receiver, plus local compression tools

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::style::Stylize;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use gzdrop::cli::{LogOpts, TargetOpts};
use gzdrop::compress;
use gzdrop::config::{self, Config};
use gzdrop::logger::{ChannelLogger, Logger, NoopLogger, StderrLogger, Tee, TextLogger};
use gzdrop::logrotate;
use gzdrop::progress::TransferProgress;
use gzdrop::sender::{SendOptions, SendSession};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "gzdrop - gzip a file and push it to a gzdropd receiver over TCP"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compress (unless already .gz) and send one file
    Send {
        /// File to send
        file: PathBuf,

        #[command(flatten)]
        target: TargetOpts,

        #[command(flatten)]
        log: LogOpts,

        /// Do not draw the progress bar
        #[arg(long)]
        no_progress: bool,

        /// Print every transfer event
        #[arg(short, long)]
        verbose: bool,
    },
    /// File -> <name>.gz, folder -> <name>.tar.gz
    Compress {
        source: PathBuf,

        /// Output directory (default: beside the source)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// .tar.gz/.tgz -> folder, .gz -> file
    Decompress {
        source: PathBuf,

        /// Output directory (default: beside the source)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Application log housekeeping
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum LogsAction {
    /// Gzip the live log and keep only the newest archives
    Rotate {
        #[command(flatten)]
        log: LogOpts,

        /// Keep rotating on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Print a plain or gzipped log
    View {
        /// Log file (default: the live log)
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        std::process::exit(130);
    })
    .expect("Error setting Ctrl-C handler");

    let args = Args::parse();
    let cfg = Config::load()?;

    match args.command {
        Command::Send {
            file,
            target,
            log,
            no_progress,
            verbose,
        } => run_send(&cfg, &file, &target, &log, no_progress, verbose),
        Command::Compress { source, output } => {
            let out_dir = output_dir(&source, output)?;
            let artifact = compress::compress_auto(&source, &out_dir)?;
            println!("Compressed -> {}", artifact.path().display());
            Ok(())
        }
        Command::Decompress { source, output } => {
            let out_dir = output_dir(&source, output)?;
            let written = compress::decompress_auto(&source, &out_dir)?;
            println!("Decompressed -> {}", written.display());
            Ok(())
        }
        Command::Logs { action } => run_logs(&cfg, action),
        Command::Config { action } => run_config(&cfg, action),
    }
}

fn output_dir(source: &Path, output: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = output {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create output directory {}", dir.display()))?;
        return Ok(dir);
    }
    Ok(source
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

fn file_logger(path: &Path) -> Arc<dyn Logger> {
    match TextLogger::new(path) {
        Ok(l) => Arc::new(l),
        Err(e) => {
            eprintln!("warning: cannot open log file {}: {e}", path.display());
            Arc::new(NoopLogger)
        }
    }
}

fn run_send(
    cfg: &Config,
    file: &Path,
    target: &TargetOpts,
    log: &LogOpts,
    no_progress: bool,
    verbose: bool,
) -> Result<()> {
    let (host, port) = target.resolve(&cfg.sender)?;
    let (events, rx) = ChannelLogger::channel();
    let logger = Arc::new(Tee(file_logger(&log.resolve(cfg)), events));

    let handle = SendSession::new(host, port, file, logger)
        .with_options(SendOptions::from(&cfg.sender))
        .spawn();

    let progress = if no_progress {
        TransferProgress::hidden()
    } else {
        TransferProgress::new(verbose)
    };
    // returns once the worker drops its logger
    progress.follow(&rx);

    let outcome = handle
        .join()
        .map_err(|_| anyhow::anyhow!("sender thread panicked"))?;
    let report = outcome.context("transfer failed")?;
    if no_progress {
        println!(
            "{} {} ({} bytes)",
            "Sent".green().bold(),
            report.filename,
            report.bytes_sent
        );
    }
    Ok(())
}

fn run_logs(cfg: &Config, action: LogsAction) -> Result<()> {
    match action {
        LogsAction::Rotate { log, watch } => {
            let path = log.resolve(cfg);
            let logger = StderrLogger;
            if watch {
                let interval = Duration::from_secs(cfg.log.rotate_interval_secs.max(1));
                println!(
                    "Rotating {} every {}s, keeping {} (Ctrl-C to stop)",
                    path.display(),
                    interval.as_secs(),
                    cfg.log.keep_rotated
                );
                // Ctrl-C exits the process, so the flag is never raised here
                let stop = AtomicBool::new(false);
                logrotate::watch(&path, cfg.log.keep_rotated, interval, &stop, &logger);
                return Ok(());
            }
            match logrotate::rotate(&path, cfg.log.keep_rotated, &logger)? {
                Some(archive) => println!("Rotated -> {}", archive.display()),
                None => println!("Nothing to rotate in {}", path.display()),
            }
            Ok(())
        }
        LogsAction::View { file } => {
            let path = file.unwrap_or_else(|| cfg.log.file.clone());
            print!("{}", logrotate::read_log(&path)?);
            Ok(())
        }
    }
}

fn run_config(cfg: &Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => print!("{}", cfg.to_toml()?),
        ConfigAction::Path => println!("{}", config::config_path().display()),
        ConfigAction::Init { force } => {
            let path = config::config_path();
            if path.exists() && !force {
                anyhow::bail!(
                    "config already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save_to(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
