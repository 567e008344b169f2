//! Shared CLI helpers and small reusable Clap fragments

use anyhow::Result;
use clap::{ArgAction, Args, Parser};
use std::path::PathBuf;

use crate::config::{Config, ReceiverConfig, SenderConfig};
use crate::target::parse_target;

/// Receiver daemon options; unset flags fall back to the config file
#[derive(Clone, Debug, Parser)]
#[command(
    name = "gzdropd",
    version,
    about = "gzdrop receiver - accept one gzip-framed file per connection and save it"
)]
pub struct ReceiverOpts {
    /// Interface to bind (default from config, else localhost)
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port to listen on (default from config, else 5000)
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// Directory received files are written to (default: next to this binary)
    #[arg(long)]
    pub save_dir: Option<PathBuf>,

    /// Keep accepting connections instead of exiting after one transfer
    #[arg(long, action = ArgAction::SetTrue)]
    pub keep_listening: bool,

    #[command(flatten)]
    pub log: LogOpts,

    /// Only log to the log file, not to stderr
    #[arg(short, long)]
    pub quiet: bool,
}

impl ReceiverOpts {
    /// Fold the flags over the config file section.
    pub fn apply(&self, cfg: &ReceiverConfig) -> ReceiverConfig {
        let mut out = cfg.clone();
        if let Some(h) = &self.host {
            out.host = h.clone();
        }
        if let Some(p) = self.port {
            out.port = p;
        }
        if let Some(d) = &self.save_dir {
            out.save_dir = Some(d.clone());
        }
        out.keep_listening |= self.keep_listening;
        out
    }
}

/// Target options for `gzdrop send`
#[derive(Clone, Debug, Args)]
pub struct TargetOpts {
    /// Receiver as [gz://]host[:port]
    #[arg(long, conflicts_with = "host")]
    pub to: Option<String>,

    /// Receiver host (default from config, else localhost)
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Receiver port; taken as typed and validated before connecting
    #[arg(short = 'P', long)]
    pub port: Option<String>,
}

impl TargetOpts {
    /// Host and raw port; an explicit `--port` wins over the one in `--to`.
    pub fn resolve(&self, cfg: &SenderConfig) -> Result<(String, String)> {
        if let Some(raw) = &self.to {
            let target = parse_target(raw, cfg.port)
                .ok_or_else(|| anyhow::anyhow!("invalid target {raw:?}"))?;
            let port = self.port.clone().unwrap_or_else(|| target.port.to_string());
            return Ok((target.host, port));
        }
        Ok((
            self.host.clone().unwrap_or_else(|| cfg.host.clone()),
            self.port.clone().unwrap_or_else(|| cfg.port.to_string()),
        ))
    }
}

#[derive(Clone, Debug, Default, Args)]
pub struct LogOpts {
    /// Append log records to this file (default from config, else Logs/app.log)
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

impl LogOpts {
    pub fn resolve(&self, cfg: &Config) -> PathBuf {
        self.log_file.clone().unwrap_or_else(|| cfg.log.file.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_flags_override_config() {
        let opts = ReceiverOpts::parse_from(["gzdropd", "-P", "6001", "--keep-listening"]);
        let cfg = ReceiverConfig::default();
        let merged = opts.apply(&cfg);
        assert_eq!(merged.port, 6001);
        assert_eq!(merged.host, "localhost");
        assert!(merged.keep_listening);
        assert_eq!(merged.save_dir, None);
    }

    #[test]
    fn receiver_defaults_come_from_config() {
        let opts = ReceiverOpts::parse_from(["gzdropd"]);
        let mut cfg = ReceiverConfig::default();
        cfg.port = 7000;
        cfg.keep_listening = true;
        let merged = opts.apply(&cfg);
        assert_eq!(merged.port, 7000);
        assert!(merged.keep_listening);
    }

    #[test]
    fn target_port_is_kept_raw() {
        let t = TargetOpts {
            to: None,
            host: None,
            port: Some("abc".into()),
        };
        let (host, port) = t.resolve(&SenderConfig::default()).unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, "abc");
    }

    #[test]
    fn to_flag_carries_host_and_port() {
        let mut t = TargetOpts {
            to: Some("gz://10.0.0.5:6000".into()),
            host: None,
            port: None,
        };
        let cfg = SenderConfig::default();
        assert_eq!(
            t.resolve(&cfg).unwrap(),
            ("10.0.0.5".to_string(), "6000".to_string())
        );
        t.to = Some("backup-box".into());
        assert_eq!(
            t.resolve(&cfg).unwrap(),
            ("backup-box".to_string(), "5000".to_string())
        );
        t.to = Some("ftp://x".into());
        assert!(t.resolve(&cfg).is_err());
    }
}
