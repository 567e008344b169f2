use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use gzdrop::cli::ReceiverOpts;
use gzdrop::config::Config;
use gzdrop::logger::{Logger, StderrLogger, Tee, TextLogger};
use gzdrop::receiver::{ReceiveOptions, Receiver};
use gzdrop::target::Target;

fn main() {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        std::process::exit(130);
    })
    .expect("Error setting Ctrl-C handler");

    let opts = ReceiverOpts::parse();
    if let Err(e) = run(&opts) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(opts: &ReceiverOpts) -> Result<()> {
    let cfg = Config::load()?;
    let rcfg = opts.apply(&cfg.receiver);
    let save_dir = rcfg.resolve_save_dir()?;
    let log_path = opts.log.resolve(&cfg);

    let file_log = TextLogger::new(&log_path)
        .with_context(|| format!("open log file {}", log_path.display()))?;
    let logger: Arc<dyn Logger> = if opts.quiet {
        Arc::new(file_log)
    } else {
        Arc::new(Tee(file_log, StderrLogger))
    };

    let bind = Target {
        host: rcfg.host.clone(),
        port: rcfg.port,
    }
    .addr();

    println!("Starting gzdrop receiver:");
    println!("  Bind: {bind}");
    println!("  Save dir: {}", save_dir.display());
    println!("  Log: {}", log_path.display());
    if rcfg.keep_listening {
        println!("  Mode: keep listening (Ctrl-C to stop)");
    }
    if rcfg.host == "0.0.0.0" || rcfg.host == "::" {
        eprintln!("WARNING: binding to all interfaces; there is no authentication or encryption");
    }

    let receiver = Receiver::bind(&bind, save_dir.clone(), logger)?
        .with_options(ReceiveOptions::from(&rcfg));

    if rcfg.keep_listening {
        receiver.serve(None)?;
        return Ok(());
    }

    let received = receiver.accept_one()?;
    println!(
        "Received {} ({} bytes) from {}",
        received.destination_path.display(),
        received.bytes_written,
        received.peer
    );
    Ok(())
}
