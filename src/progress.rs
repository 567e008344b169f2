//! Terminal progress for a send, driven by transfer events
//!
//! The sender runs on a worker thread and reports through a
//! [`ChannelLogger`](crate::logger::ChannelLogger); this side only renders.

use crate::events::TransferEvent;
use crate::logger::{Level, Record};
use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::mpsc;
use std::time::{Duration, Instant};

pub struct TransferProgress {
    bar: ProgressBar,
    start_time: Instant,
    verbose: bool,
}

impl TransferProgress {
    pub fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self {
            bar,
            start_time: Instant::now(),
            verbose,
        }
    }

    /// Hidden bar for non-interactive runs; events are still consumed.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            start_time: Instant::now(),
            verbose: false,
        }
    }

    fn switch_to_bytes(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
    }

    fn print_line(&self, level: Level, message: &str) {
        let tag = match level {
            Level::Info => "info".with(Color::Cyan),
            Level::Success => "done".with(Color::Green).bold(),
            Level::Error => "error".with(Color::Red).bold(),
        };
        self.bar.suspend(|| eprintln!("  {tag} {message}"));
    }

    /// Apply one record; returns true once the transfer reached an end state.
    pub fn apply(&self, record: &Record) -> bool {
        let Some(event) = &record.event else {
            if self.verbose || record.level == Level::Error {
                self.print_line(record.level, &record.message);
            }
            return false;
        };
        match event {
            TransferEvent::PayloadReady {
                size, compressed, ..
            } => {
                self.switch_to_bytes(*size);
                self.bar
                    .set_message(if *compressed { "compressed" } else { "sending as is" });
            }
            TransferEvent::Connected { addr } => {
                self.bar.set_message(format!("connected to {addr}"));
            }
            TransferEvent::BytesSent { sent, .. } => self.bar.set_position(*sent),
            TransferEvent::SendCompleted { sent, .. } => {
                self.bar.set_position(*sent);
                let secs = self.start_time.elapsed().as_secs_f64();
                self.bar.finish_with_message(format!(
                    "{} {:.1} KB in {:.1}s",
                    "Sent".with(Color::Green).bold(),
                    *sent as f64 / 1024.0,
                    secs
                ));
            }
            TransferEvent::Failed { error, .. } => {
                self.bar
                    .abandon_with_message(format!("{} {error}", "Failed".with(Color::Red).bold()));
            }
            _ => {}
        }
        if self.verbose && !matches!(event, TransferEvent::BytesSent { .. }) {
            self.print_line(record.level, &record.message);
        }
        event.is_terminal()
    }

    /// Drain records until the sender hangs up.
    pub fn follow(&self, rx: &mpsc::Receiver<Record>) {
        for record in rx.iter() {
            self.apply(&record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(event: TransferEvent) -> Record {
        Record {
            component: "Sender".into(),
            level: event.level(),
            message: event.to_string(),
            event: Some(event),
        }
    }

    #[test]
    fn terminal_events_end_rendering() {
        let p = TransferProgress::hidden();
        assert!(!p.apply(&rec(TransferEvent::Connected { addr: "x:1".into() })));
        assert!(!p.apply(&rec(TransferEvent::BytesSent { sent: 1, total: 2 })));
        assert!(p.apply(&rec(TransferEvent::SendCompleted { sent: 2, total: 2 })));
    }

    #[test]
    fn payload_message_reflects_compression() {
        let p = TransferProgress::hidden();
        p.apply(&rec(TransferEvent::PayloadReady {
            artifact: "/tmp/x/notes.txt.gz".into(),
            compressed: true,
            size: 10,
        }));
        assert_eq!(p.bar.message(), "compressed");
        p.apply(&rec(TransferEvent::PayloadReady {
            artifact: "archive.tar.gz".into(),
            compressed: false,
            size: 10,
        }));
        assert_eq!(p.bar.message(), "sending as is");
    }

    #[test]
    fn follow_returns_when_channel_closes() {
        let (tx, rx) = mpsc::channel();
        tx.send(rec(TransferEvent::SocketClosed)).unwrap();
        drop(tx);
        TransferProgress::hidden().follow(&rx);
    }
}
