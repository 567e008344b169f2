use crate::events::TransferEvent;
use anyhow::Result;
use chrono::Local;
use parking_lot::Mutex;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{mpsc, Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Info => "INFO",
            Level::Success => "SUCCESS",
            Level::Error => "ERROR",
        })
    }
}

/// Sink for log records. Every method has a default so a no-op sink is a unit struct.
pub trait Logger: Send + Sync {
    fn log(&self, _component: &str, _level: Level, _message: &str) {}

    fn event(&self, component: &str, event: &TransferEvent) {
        self.log(component, event.level(), &event.to_string());
    }
}

impl<L: Logger + ?Sized> Logger for Arc<L> {
    fn log(&self, component: &str, level: Level, message: &str) {
        (**self).log(component, level, message)
    }
    fn event(&self, component: &str, event: &TransferEvent) {
        (**self).event(component, event)
    }
}

/// `[YYYY-MM-DD HH:MM:SS] [LEVEL] Component - message`
pub fn format_line(component: &str, level: Level, message: &str) -> String {
    format!(
        "[{}] [{}] {} - {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        level,
        component,
        message
    )
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Appends one record per line to a file.
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }
}

impl Logger for TextLogger {
    fn log(&self, component: &str, level: Level, message: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "{}", format_line(component, level, message));
    }
}

pub struct StderrLogger;

impl Logger for StderrLogger {
    fn log(&self, component: &str, level: Level, message: &str) {
        eprintln!("{}", format_line(component, level, message));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub component: String,
    pub level: Level,
    pub message: String,
    pub event: Option<TransferEvent>,
}

/// Keeps every record in memory.
#[derive(Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<Record>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    pub fn events(&self) -> Vec<TransferEvent> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| r.event.clone())
            .collect()
    }

    pub fn has_level(&self, level: Level) -> bool {
        self.records.lock().iter().any(|r| r.level == level)
    }
}

impl Logger for MemoryLogger {
    fn log(&self, component: &str, level: Level, message: &str) {
        self.records.lock().push(Record {
            component: component.to_string(),
            level,
            message: message.to_string(),
            event: None,
        });
    }

    fn event(&self, component: &str, event: &TransferEvent) {
        self.records.lock().push(Record {
            component: component.to_string(),
            level: event.level(),
            message: event.to_string(),
            event: Some(event.clone()),
        });
    }
}

/// Forwards records to another thread, typically a UI loop.
pub struct ChannelLogger {
    tx: Mutex<mpsc::Sender<Record>>,
}

impl ChannelLogger {
    pub fn new(tx: mpsc::Sender<Record>) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    pub fn channel() -> (Self, mpsc::Receiver<Record>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }

    fn send(&self, record: Record) {
        // receiver gone means nobody is watching; drop silently
        let _ = self.tx.lock().send(record);
    }
}

impl Logger for ChannelLogger {
    fn log(&self, component: &str, level: Level, message: &str) {
        self.send(Record {
            component: component.to_string(),
            level,
            message: message.to_string(),
            event: None,
        });
    }

    fn event(&self, component: &str, event: &TransferEvent) {
        self.send(Record {
            component: component.to_string(),
            level: event.level(),
            message: event.to_string(),
            event: Some(event.clone()),
        });
    }
}

/// Sends each record to both loggers.
pub struct Tee<A, B>(pub A, pub B);

impl<A: Logger, B: Logger> Logger for Tee<A, B> {
    fn log(&self, component: &str, level: Level, message: &str) {
        self.0.log(component, level, message);
        self.1.log(component, level, message);
    }

    fn event(&self, component: &str, event: &TransferEvent) {
        self.0.event(component, event);
        self.1.event(component, event);
    }
}
