//! Error taxonomy shared by the compression engine, sender and receiver

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the compression engine.
#[derive(Debug, Error)]
pub enum CompressError {
    /// Local file could not be read/written, or a gzip stream was malformed
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Tar build or unpack failed (truncated or non-tar content)
    #[error("archive {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A stage failed and its intermediate artifact could not be removed
    #[error("intermediate file {} left behind after failure ({cause}): {source}", .path.display())]
    Leak {
        path: PathBuf,
        cause: String,
        #[source]
        source: io::Error,
    },
}

impl CompressError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CompressError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn archive(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CompressError::Archive {
            path: path.into(),
            source,
        }
    }

    /// Path of the file the failure is about.
    pub fn path(&self) -> &std::path::Path {
        match self {
            CompressError::Io { path, .. }
            | CompressError::Archive { path, .. }
            | CompressError::Leak { path, .. } => path,
        }
    }
}

/// Where in a session an I/O failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Header,
    Body,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Header => f.write_str("header"),
            Stage::Body => f.write_str("body"),
        }
    }
}

/// Errors surfaced by a send or receive session.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad host/port/missing file; nothing was opened
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("compression failed: {0}")]
    Compression(#[from] CompressError),

    /// Socket establishment failed; no bytes were sent
    #[error("connect {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Malformed or empty filename on the wire
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O failure mid-stream; partial effects are kept
    #[error("transfer failed during {stage} after {bytes}{} bytes: {source}", .total.map(|t| format!("/{t}")).unwrap_or_default())]
    Transfer {
        stage: Stage,
        bytes: u64,
        total: Option<u64>,
        #[source]
        source: io::Error,
    },

    /// Local file I/O outside the transfer stream
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Payload-free discriminant of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Compression,
    Connection,
    Protocol,
    Transfer,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Compression(_) => ErrorKind::Compression,
            Error::Connection { .. } => ErrorKind::Connection,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Transfer { .. } => ErrorKind::Transfer,
            Error::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_error_reports_byte_counts() {
        let e = Error::Transfer {
            stage: Stage::Body,
            bytes: 1024,
            total: Some(4096),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"),
        };
        let msg = e.to_string();
        assert!(msg.contains("body"));
        assert!(msg.contains("1024/4096"));
        assert_eq!(e.kind(), ErrorKind::Transfer);
    }

    #[test]
    fn receiver_side_transfer_error_has_no_total() {
        let e = Error::Transfer {
            stage: Stage::Header,
            bytes: 3,
            total: None,
            source: io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
        };
        assert!(e.to_string().contains("after 3 bytes"));
    }

    #[test]
    fn compress_error_converts_into_compression_kind() {
        let inner = CompressError::io("/nope", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(inner.path(), std::path::Path::new("/nope"));
        let e: Error = inner.into();
        assert_eq!(e.kind(), ErrorKind::Compression);
    }
}
