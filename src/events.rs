//! Structured events emitted at every session state transition

use crate::logger::Level;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    SendStarted {
        host: String,
        port: String,
        source: PathBuf,
    },
    PayloadReady {
        artifact: PathBuf,
        compressed: bool,
        size: u64,
    },
    Connected {
        addr: String,
    },
    HeaderSent {
        filename: String,
    },
    BytesSent {
        sent: u64,
        total: u64,
    },
    SendCompleted {
        sent: u64,
        total: u64,
    },
    Listening {
        addr: String,
        save_dir: PathBuf,
    },
    Accepted {
        peer: String,
    },
    FilenameReceived {
        name: String,
        destination: PathBuf,
        reduced: bool,
    },
    BytesReceived {
        received: u64,
    },
    ReceiveCompleted {
        destination: PathBuf,
        bytes: u64,
    },
    Failed {
        state: String,
        context: String,
        error: String,
    },
    SocketClosed,
    CloseFailed {
        error: String,
    },
    CleanupFailed {
        path: PathBuf,
        error: String,
    },
}

impl TransferEvent {
    pub fn level(&self) -> Level {
        match self {
            TransferEvent::SendCompleted { .. } | TransferEvent::ReceiveCompleted { .. } => {
                Level::Success
            }
            TransferEvent::Failed { .. }
            | TransferEvent::CloseFailed { .. }
            | TransferEvent::CleanupFailed { .. } => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEvent::SendCompleted { .. }
                | TransferEvent::ReceiveCompleted { .. }
                | TransferEvent::Failed { .. }
        )
    }
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferEvent::SendStarted { host, port, source } => write!(
                f,
                "Initializing transfer of {} to {host}:{port}",
                source.display()
            ),
            TransferEvent::PayloadReady {
                artifact,
                compressed: true,
                size,
            } => write!(
                f,
                "Temporary gz file created: {} ({size} bytes)",
                artifact.display()
            ),
            TransferEvent::PayloadReady { artifact, size, .. } => write!(
                f,
                "File already compressed (.gz), sending as is: {} ({size} bytes)",
                artifact.display()
            ),
            TransferEvent::Connected { addr } => write!(f, "Connected to {addr}"),
            TransferEvent::HeaderSent { filename } => write!(f, "Sent filename: {filename}"),
            TransferEvent::BytesSent { sent, total } => write!(f, "Bytes sent: {sent}/{total}"),
            TransferEvent::SendCompleted { sent, total } => {
                write!(f, "Transfer completed. Bytes sent: {sent}/{total}")
            }
            TransferEvent::Listening { addr, save_dir } => write!(
                f,
                "Listening on {addr}, saving to {}",
                save_dir.display()
            ),
            TransferEvent::Accepted { peer } => write!(f, "Client connected: {peer}"),
            TransferEvent::FilenameReceived {
                name,
                destination,
                reduced,
            } => {
                write!(f, "Filename received: {name:?} -> {}", destination.display())?;
                if *reduced {
                    f.write_str(" (directory components dropped)")?;
                }
                Ok(())
            }
            TransferEvent::BytesReceived { received } => write!(f, "Bytes received: {received}"),
            TransferEvent::ReceiveCompleted { destination, bytes } => write!(
                f,
                "File received and saved as {} ({bytes} bytes)",
                destination.display()
            ),
            TransferEvent::Failed {
                state,
                context,
                error,
            } => write!(f, "Failed in {state} [{context}]: {error}"),
            TransferEvent::SocketClosed => f.write_str("Socket closed"),
            TransferEvent::CloseFailed { error } => write!(f, "Failed to close socket: {error}"),
            TransferEvent::CleanupFailed { path, error } => write!(
                f,
                "Failed to remove temporary file {}: {error}",
                path.display()
            ),
        }
    }
}
